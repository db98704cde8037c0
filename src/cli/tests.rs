use super::*;
use crate::cli::serve::relay_config;
use crate::core::relay::CredentialMode;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }
}

use test_helpers::parse_args;

#[test]
fn serve_flags_override_config() {
    let args = parse_args(&[
        "chatrelay",
        "serve",
        "--bind",
        "0.0.0.0:8080",
        "-p",
        "anthropic",
        "--env-key",
        "--forward-upstream-status",
    ]);
    let Commands::Serve(serve_args) = args.command else {
        panic!("expected serve subcommand");
    };

    let mut config = Config::default();
    config.relay.model = Some("from-file".to_string());
    let relay = relay_config(&config, &serve_args);

    assert_eq!(relay.bind, "0.0.0.0:8080");
    assert_eq!(relay.provider, ProviderKind::AnthropicComplete);
    assert_eq!(relay.credential, CredentialMode::Environment);
    assert!(relay.forward_upstream_status);
    assert_eq!(relay.model(), "from-file");
}

#[test]
fn say_collects_prompt_words() {
    let args = parse_args(&["chatrelay", "say", "-t", "0.2", "Hello", "there", "friend"]);
    let Commands::Say { client, prompt } = args.command else {
        panic!("expected say subcommand");
    };
    assert_eq!(prompt, vec!["Hello", "there", "friend"]);
    assert_eq!(client.temperature, Some(0.2));
}

#[test]
fn say_requires_a_prompt() {
    assert!(Args::try_parse_from(["chatrelay", "say"]).is_err());
}

#[test]
fn client_flags_apply_over_config() {
    let args = parse_args(&[
        "chatrelay",
        "--config",
        "/tmp/chatrelay.toml",
        "chat",
        "--relay-url",
        "http://relay.test/api/converse",
        "--get",
        "--max-attempts",
        "4",
        "-m",
        "gpt-test",
        "-l",
        "chat.log",
    ]);
    assert_eq!(
        args.config.as_deref(),
        Some(std::path::Path::new("/tmp/chatrelay.toml"))
    );
    let Commands::Chat { client, log } = args.command else {
        panic!("expected chat subcommand");
    };
    assert_eq!(log.as_deref(), Some("chat.log"));

    let mut config = Config::default();
    client.apply(&mut config);
    assert_eq!(config.client.relay_url, "http://relay.test/api/converse");
    assert_eq!(config.client.method, RequestBinding::Get);
    assert_eq!(config.client.max_attempts, Some(4));
    assert_eq!(config.client.model.as_deref(), Some("gpt-test"));
    assert_eq!(config.client.temperature, 0.7);

    let consumer = ConsumerConfig::from_client_config(&config.client, Some("  ".to_string()));
    assert_eq!(consumer.credential, None);
    assert_eq!(consumer.retry.max_attempts, Some(4));
}

#[test]
fn unknown_provider_is_rejected() {
    assert!(Args::try_parse_from(["chatrelay", "serve", "-p", "nonsense"]).is_err());
}

#[test]
fn config_force_requires_init() {
    assert!(Args::try_parse_from(["chatrelay", "config", "--force"]).is_err());
    let args = parse_args(&["chatrelay", "config", "--init", "--force"]);
    assert!(matches!(
        args.command,
        Commands::Config {
            init: true,
            force: true
        }
    ));
}
