use std::time::Duration;

use resilient_http::{ClientConfig, HttpClient, Outcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let url = std::env::var("TARGET_URL").unwrap_or_else(|_| "https://example.com".to_owned());

    let mut builder = ClientConfig::builder()
        .max_retries(3)
        .request_delay(Duration::from_millis(500));
    if let Ok(proxies) = std::env::var("PROXIES") {
        builder = builder.proxies(
            proxies
                .split(',')
                .map(str::trim)
                .filter(|proxy| !proxy.is_empty()),
        );
    }
    let client = HttpClient::new(builder.build()?);

    let result = client.get(&url).await;
    match result.outcome {
        Outcome::Success => println!(
            "{} bytes after {} attempt(s)",
            result.body.len(),
            result.attempts_used
        ),
        _ => println!(
            "gave up after {} attempt(s): status {} {}",
            result.attempts_used, result.status_code, result.error_message
        ),
    }

    for entry in client.proxies().await {
        println!("{:?}", entry);
    }

    Ok(())
}
