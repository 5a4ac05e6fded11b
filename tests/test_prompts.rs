//! Tests for agent prompt loading from config/prompts

use std::fs;
use std::path::Path;

fn prompts_dir() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/prompts")
}

fn prompt_path(name: &str) -> std::path::PathBuf {
    prompts_dir().join(name)
}

#[test]
fn test_id_prompt_file_exists() {
    assert!(prompt_path("id.md").exists(), "id.md prompt file missing");
}

#[test]
fn test_chat_prompt_template_vars() {
    let text = fs::read_to_string(prompt_path("chat.md")).unwrap();
    assert!(text.contains("{{context}}"), "chat.md should contain {{context}} variable");
    assert!(text.contains("{{history}}"), "chat.md should contain {{history}} variable");
    assert!(text.contains("{{question}}"), "chat.md should contain {{question}} variable");
}

#[test]
fn test_thinking_analysis_template_vars() {
    let text = fs::read_to_string(prompt_path("thinking_analysis.md")).unwrap();
    assert!(text.contains("{{problem}}"), "thinking_analysis.md should contain {{problem}} variable");
    assert!(text.contains("solution_steps"), "thinking_analysis.md should request solution_steps");
}

#[test]
fn test_thinking_decompose_template_vars() {
    let text = fs::read_to_string(prompt_path("thinking_decompose.md")).unwrap();
    assert!(text.contains("{{step}}"), "thinking_decompose.md should contain {{step}} variable");
    assert!(text.contains("{{problem}}"), "thinking_decompose.md should contain {{problem}} variable");
}

#[test]
fn test_thinking_reason_template_vars() {
    let text = fs::read_to_string(prompt_path("thinking_reason.md")).unwrap();
    assert!(text.contains("{{step}}"), "thinking_reason.md should contain {{step}} variable");
    assert!(text.contains("{{actions}}"), "thinking_reason.md should contain {{actions}} variable");
    assert!(text.contains("reasoning_process"), "thinking_reason.md should request reasoning_process");
}

#[test]
fn test_thinking_validate_template_vars() {
    let text = fs::read_to_string(prompt_path("thinking_validate.md")).unwrap();
    assert!(text.contains("{{result}}"), "thinking_validate.md should contain {{result}} variable");
    assert!(text.contains("confidence_adjustment"), "thinking_validate.md should request confidence_adjustment");
}

#[test]
fn test_thinking_synthesis_template_vars() {
    let text = fs::read_to_string(prompt_path("thinking_synthesis.md")).unwrap();
    assert!(text.contains("{{results}}"), "thinking_synthesis.md should contain {{results}} variable");
    assert!(text.contains("final_answer"), "thinking_synthesis.md should request final_answer");
}

#[test]
fn test_default_config_parses() {
    let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/default.toml");
    let cfg = samara_bot::config::load_from(&config_path, Some("/tmp/samara-test"), None, None)
        .expect("default config should parse");
    assert_eq!(cfg.service_name, "samara");
    assert_eq!(cfg.agents.default_agent, "chat");
    assert_eq!(cfg.retrieval.chunk_size, 1000);
    assert_eq!(cfg.thinking.max_steps, 8);
}
