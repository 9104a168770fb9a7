use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.chunking.min_tokens, 100);
    assert_eq!(config.chunking.max_tokens, 2000);
    assert_eq!(config.chunking.target_tokens, 1000);
    assert_eq!(config.index.kind, IndexKind::Flat);
    assert_eq!(config.index.nlist, 100);
    assert_eq!(config.search.default_k, 10);
    assert_eq!(config.search.snippet_length, 200);
    assert!(config.validate().is_ok());
}

#[test]
fn ollama_validation() {
    let config = Config::default();

    let mut invalid = config.clone();
    invalid.ollama.protocol = "ftp".to_string();
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid = config.clone();
    invalid.ollama.port = 0;
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.ollama.model = String::new();
    assert!(invalid.validate().is_err());

    let mut invalid = config.clone();
    invalid.ollama.batch_size = 1001;
    assert!(invalid.validate().is_err());

    let mut invalid = config;
    invalid.ollama.embedding_dimension = 8;
    assert!(matches!(
        invalid.validate(),
        Err(ConfigError::InvalidEmbeddingDimension(8))
    ));
}

#[test]
fn token_budget_must_be_ordered() {
    let mut config = Config::default();
    config.chunking.target_tokens = 3000;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidTokenBudget {
            min: 100,
            target: 3000,
            max: 2000
        })
    ));

    config.chunking.target_tokens = 100;
    assert!(config.validate().is_err());

    config.chunking.target_tokens = 300;
    config.chunking.max_tokens = 500;
    assert!(config.validate().is_ok());
}

#[test]
fn index_validation() {
    let mut config = Config::default();
    config.index.nlist = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidNlist(0))));

    config.index.nlist = 16;
    config.index.kind = IndexKind::Ivf;
    config.index.nprobe = 32;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidNprobe {
            nprobe: 32,
            nlist: 16
        })
    ));

    config.index.nprobe = 4;
    assert!(config.validate().is_ok());

    config.index.kind = IndexKind::Hnsw;
    config.index.m = 1;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidHnswLinks(1))
    ));

    config.index.m = 16;
    config.index.ef_search = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidEfSearch(0))
    ));

    config.index.ef_search = 128;
    assert!(config.validate().is_ok());
}

#[test]
fn search_validation() {
    let mut config = Config::default();
    config.search.default_k = 0;
    assert!(config.validate().is_err());

    config.search.default_k = 5;
    config.search.snippet_length = 3;
    assert!(config.validate().is_err());

    config.search.snippet_length = 120;
    config.search.context_window = 50;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidContextWindow(50))
    ));
}

#[test]
fn ollama_url_generation() {
    let mut config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");

    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;
    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_model("new-model".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());

    assert!(config.set_protocol("HTTP".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_model("   ".to_string()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert_eq!(config.protocol, "https");
    assert_eq!(config.batch_size, 128);
}

#[test]
fn toml_round_trip() {
    let mut config = Config::default();
    config.index.kind = IndexKind::Ivf;
    config.chunking.exact_tokenizer = Some(PathBuf::from("/models/tokenizer.json"));

    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed: Config = toml::from_str(&toml_str).expect("should parse toml correctly");

    assert_eq!(config, parsed);
}

#[test]
fn partial_config_fills_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [ollama]
        host = "gpu-box"

        [index]
        kind = "ivf"
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(parsed.ollama.host, "gpu-box");
    assert_eq!(parsed.ollama.port, 11434);
    assert_eq!(parsed.index.kind, IndexKind::Ivf);
    assert_eq!(parsed.chunking, ChunkingConfig::default());
    assert_eq!(parsed.search, SearchConfig::default());
}

#[test]
fn load_missing_config_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(
        config.index_path(),
        temp_dir.path().join("index").join("docqa")
    );
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let base_dir = temp_dir.path().join(".docqa");
    let mut config = Config {
        base_dir: base_dir.clone(),
        ..Config::default()
    };
    config.search.default_k = 25;
    config.ollama.model = "mxbai-embed-large".to_string();

    config.save().expect("should save");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(&base_dir).expect("should load");
    assert_eq!(loaded, config);
}

#[test]
fn invalid_file_is_rejected_on_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nmin_tokens = 900\ntarget_tokens = 500\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn save_refuses_invalid_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama.port = 0;

    assert!(config.save().is_err());
    assert!(!config.config_file_path().exists());
}
