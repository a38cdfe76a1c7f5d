use std::io::Write;

use ragloop_core::config::AppConfig;
use ragloop_core::error::RagError;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[agent]
max_iterations = 5
max_duration_secs = 60
model_timeout_secs = 20

[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "sk-test-key"
max_tokens = 512
temperature = 0.2

[model.retry]
max_retries = 2
initial_backoff_ms = 100
max_backoff_ms = 1000

[[fallback_models]]
provider = "ollama"
model_id = "mistral"

[embedding]
provider = "openai"
model = "text-embedding-3-small"
dimensions = 1536
batch_size = 32

[retriever]
name = "search_notes"
description = "Search my notes."
top_k = 6
timeout_secs = 10

[ingest]
urls = ["https://example.com/a", "https://example.com/b"]
chunk_size = 800
chunk_overlap = 100
"#;

    let tmp = write_config(toml_content);
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.agent.max_iterations, 5);
    assert_eq!(config.agent.max_duration_secs, 60);
    assert_eq!(config.agent.model_timeout_secs, 20);

    assert_eq!(config.model.provider, "openai");
    assert_eq!(config.model.model_id, "gpt-4o-mini");
    assert_eq!(config.model.api_key, Some("sk-test-key".to_string()));
    assert_eq!(config.model.max_tokens, 512);
    assert!((config.model.temperature - 0.2).abs() < f32::EPSILON);
    let retry = config.model.retry.as_ref().expect("retry config");
    assert_eq!(retry.max_retries, 2);

    assert_eq!(config.fallback_models.len(), 1);
    assert_eq!(config.fallback_models[0].model_id, "mistral");

    assert_eq!(config.embedding.model, "text-embedding-3-small");
    assert_eq!(config.embedding.dimensions, 1536);
    assert_eq!(config.embedding.batch_size, 32);
    assert_eq!(config.embedding.resolved_base_url(), "https://api.openai.com/v1");

    assert_eq!(config.retriever.name, "search_notes");
    assert_eq!(config.retriever.top_k, 6);

    assert_eq!(config.ingest.urls.len(), 2);
    assert_eq!(config.ingest.chunk_size, 800);
    assert_eq!(config.ingest.chunk_overlap, 100);
}

#[test]
fn test_empty_file_gives_defaults() {
    let tmp = write_config("");
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "ollama");
    assert_eq!(config.model.model_id, "mistral");
    assert_eq!(config.model.temperature, 0.0);
    assert_eq!(config.embedding.model, "all-minilm:latest");
    assert_eq!(config.retriever.name, "retrieve_blog_posts");
    assert_eq!(config.ingest.urls.len(), 3);
    assert_eq!(config.ingest.chunk_size, 500);
    assert_eq!(config.ingest.chunk_overlap, 50);
    assert_eq!(config.agent.max_iterations, 3);
}

#[test]
fn test_env_var_expansion() {
    std::env::set_var("RAGLOOP_IT_API_KEY", "sk-from-env");
    let tmp = write_config(
        r#"
[model]
provider = "openai"
model_id = "gpt-4o-mini"
api_key = "${RAGLOOP_IT_API_KEY}"
"#,
    );
    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.model.api_key.as_deref(), Some("sk-from-env"));
}

#[test]
fn test_invalid_chunking_rejected() {
    let tmp = write_config(
        r#"
[ingest]
chunk_size = 100
chunk_overlap = 100
"#,
    );
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}

#[test]
fn test_malformed_toml_rejected() {
    let tmp = write_config("[agent\nmax_iterations = ");
    let err = AppConfig::load(tmp.path()).unwrap_err();
    assert!(matches!(err, RagError::Config(_)));
}

#[test]
fn test_missing_file() {
    let err = AppConfig::load(std::path::Path::new("/nonexistent/ragloop.toml")).unwrap_err();
    assert!(matches!(err, RagError::ConfigNotFound(_)));
}
