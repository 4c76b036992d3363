//! Session commands.

use amor_chai_storefront::context::ClientContext;

use super::CliError;

/// Sign in; the cart switches to the account's saved cart.
///
/// # Errors
///
/// Returns `CliError::Identity` if the credentials are rejected or Supabase
/// is not configured.
#[allow(clippy::print_stdout)]
pub async fn sign_in(context: &ClientContext, email: &str, password: &str) -> Result<(), CliError> {
    let user = context.sign_in(email, password).await?;
    println!(
        "Signed in as {} ({} items in cart)",
        user.email.as_deref().unwrap_or("unknown"),
        context.cart().item_count()
    );
    Ok(())
}

#[allow(clippy::print_stdout)]
pub async fn sign_out(context: &ClientContext) {
    let outcome = context.sign_out().await;
    match outcome.message() {
        Some(message) => println!("{message}"),
        None => println!("Sign-out already in progress"),
    }
}

#[allow(clippy::print_stdout)]
pub fn whoami(context: &ClientContext) {
    match context.session().current_user() {
        Some(user) => println!(
            "{} ({})",
            user.email.as_deref().unwrap_or("no email"),
            user.id
        ),
        None if context.session().is_configured() => println!("Not signed in"),
        None => println!("Not signed in (Supabase not configured, local cart only)"),
    }
}
