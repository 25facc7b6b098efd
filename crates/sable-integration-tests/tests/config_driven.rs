//! Integration tests for configuration flowing into live connections.

mod common;

use common::{TOKEN, WAIT};
use sable_client::ConnectionSupervisor;
use sable_config::ClientConfig;
use sable_core::Token;
use sable_test::MockGateway;
use serde_json::json;

#[tokio::test]
async fn toml_settings_reach_the_identify_payload() {
    let mut gateway = MockGateway::start().await;
    let toml = format!(
        r#"
token_env = "SABLE_IT_TOKEN"

[gateway]
url = "{}"
shard_count = 1
intents = 513
large_threshold = 150
identify_interval_ms = 10

[logging]
level = "debug"
"#,
        gateway.url()
    );
    let config = ClientConfig::from_toml_str(&toml).unwrap();
    assert_eq!(
        config
            .resolve_token_with(|name| (name == "SABLE_IT_TOKEN").then(|| format!("  {TOKEN}\n")))
            .unwrap(),
        TOKEN
    );

    let supervisor = ConnectionSupervisor::builder(config)
        .token(Token::bot(TOKEN).unwrap())
        .start()
        .await
        .unwrap();

    let mut conn = gateway.accept().await;
    conn.hello(45_000).await;
    let identify = conn.expect_op(2).await;
    assert_eq!(identify["d"]["intents"], 513);
    assert_eq!(identify["d"]["large_threshold"], 150);
    assert_eq!(identify["d"]["shard"], json!([0, 1]));
    assert_eq!(identify["d"]["token"], TOKEN);

    tokio::time::timeout(WAIT, supervisor.shutdown()).await.unwrap();
}

#[test]
fn invalid_settings_are_rejected_before_connecting() {
    let err = ClientConfig::from_toml_str("[gateway]\nshard_count = 0\n").unwrap_err();
    assert!(err.to_string().contains("shard_count"), "{err}");
}
