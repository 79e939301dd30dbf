use std::time::Duration;

use portal_http::{CancellationToken, PortalClient, RequestError, RequestOptions};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Application {
    id: u64,
    status: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = PortalClient::from_env();
    println!("{client:?}");

    let listings = client
        .get("/accommodations", RequestOptions::default())
        .await?;
    println!("listings: {listings:?}");

    // Submitting an application is not idempotent: never resend it on timeout.
    let submitted = client
        .post(
            "/bookings/apply",
            json!({"studentId": 1, "accommodationId": 2}),
            RequestOptions::new().no_retry(),
        )
        .await;
    match submitted {
        Ok(payload) => {
            let application: Application = payload.json()?;
            println!("applied: #{} ({})", application.id, application.status);
        }
        Err(err @ RequestError::Http { .. }) => {
            println!("rejected: {}", serde_json::to_string(&err.report())?);
        }
        Err(err) => return Err(err.into()),
    }

    let signal = CancellationToken::new();
    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });
    let cancelled = client
        .get("/admin/dashboard/overview", RequestOptions::new().signal(signal))
        .await;
    println!("cancelled call: {cancelled:?}");

    Ok(())
}
