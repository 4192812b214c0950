//! Email Worker Service - Entry Point
//!
//! Background worker that drains the email notification queue.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    atrium_email_worker::run().await
}
