use std::time::Duration;

use feature_flags::{ClientConfig, EvaluationContext};

pub fn main() {
    env_logger::init();

    let base_url = std::env::var("FLAGS_BASE_URL")
        .unwrap_or_else(|_| ClientConfig::DEFAULT_BASE_URL.to_owned());
    let mut config = ClientConfig::from_base_url(base_url);
    if let Ok(api_key) = std::env::var("FLAGS_API_KEY") {
        config = config.api_key(api_key);
    }
    let client = config.to_client();

    // Start a refresher thread to fetch definitions from the server.
    if let Err(err) = client.start() {
        eprintln!("Cannot start the client: {err}");
        return;
    }

    // Until definitions are fetched, the client serves the defaults passed to each call.
    if let Err(err) = client.wait_until_ready(Duration::from_secs(5)) {
        eprintln!("Definitions are not available yet: {err}");
    }

    let context = EvaluationContext::new("test-subject").with_attribute("country", "US");

    let enabled = client.is_enabled("new-ui", &context, false);
    println!("new-ui enabled: {enabled}");

    let experiment = client.get_experiment("checkout-flow", &context, "control");
    println!(
        "checkout-flow variant: {} (payload: {:?}, reason: {:?})",
        experiment.variant, experiment.payload, experiment.reason
    );

    println!("Status: {:?}", client.status());

    if let Err(err) = client.stop() {
        eprintln!("Failed to stop the client: {err}");
    }
}
