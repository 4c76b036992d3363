//! Checkout from the terminal: zone gate, then payment initialization.

use amor_chai_core::{CurrencyCode, DeliveryAddress};
use amor_chai_storefront::checkout::{SubmitOutcome, ZoneDenial};
use amor_chai_storefront::context::ClientContext;

use super::CliError;

#[allow(clippy::print_stdout)]
fn print_denial(denial: &ZoneDenial) {
    println!("{}", denial.message);
    println!("{}", denial.contact_message());
    println!("{}", denial.contact_url);
}

/// Verify the address, then create the payment intent.
///
/// # Errors
///
/// Returns `CliError::CheckoutRefused` if the submission is refused and
/// `CliError::Payment` if payment cannot be initialized.
#[allow(clippy::print_stdout)]
pub async fn run(
    context: &ClientContext,
    postal_code: String,
    lat: Option<f64>,
    lng: Option<f64>,
) -> Result<(), CliError> {
    let flow = context.checkout();
    flow.set_address(DeliveryAddress {
        postal_code: Some(postal_code),
        lat,
        lng,
    });

    let outcome = flow
        .submit()
        .await
        .map_err(|refused| CliError::CheckoutRefused(refused.to_string()))?;
    if let SubmitOutcome::Denied(denial) = outcome {
        print_denial(&denial);
        return Ok(());
    }

    let setup = flow.initialize_payment().await;
    flow.finish_submission();
    let setup = setup?;

    let usd = CurrencyCode::USD;
    println!("Subtotal: {}", usd.format(setup.totals.subtotal));
    println!("Tax:      {}", usd.format(setup.totals.tax));
    println!("Total:    {}", usd.format(setup.totals.total));
    println!("Client secret: {}", setup.client_secret);
    Ok(())
}
