//! Payment lookups.

use amor_chai_core::ReturnOutcome;
use amor_chai_storefront::context::ClientContext;

#[allow(clippy::print_stdout)]
pub async fn status(context: &ClientContext, client_secret: &str) {
    let message = match context.checkout().return_outcome(client_secret).await {
        ReturnOutcome::Confirmed => "Order confirmed. Thank you!",
        ReturnOutcome::Processing => "Payment processing. We'll update you when it completes.",
        ReturnOutcome::Failed => "Payment failed. Please try again.",
        ReturnOutcome::Pending => "Checking payment status...",
    };
    println!("{message}");
}
