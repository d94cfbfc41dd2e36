use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    pub instructions: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RepairConfig {
    pub template: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlanConfig {
    pub auto_continue: String,
    pub approval: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PromptsConfig {
    pub system: SystemConfig,
    pub repair: RepairConfig,
    pub plan: PlanConfig,
}

impl PromptsConfig {
    pub fn load() -> Result<Self> {
        let config_paths = ["prompts.toml", "./prompts.toml", "../prompts.toml"];

        for path in &config_paths {
            if let Ok(content) = fs::read_to_string(path) {
                return toml::from_str(&content)
                    .with_context(|| format!("Failed to parse prompts.toml from {}", path));
            }
        }

        Ok(Self::default())
    }

    pub fn get_system_instructions(&self) -> &str {
        &self.system.instructions
    }

    pub fn get_repair_prompt(&self, message: &str, file: &str, line: u32, stack: &str, code: &str) -> String {
        self.repair
            .template
            .replace("{message}", message)
            .replace("{file}", file)
            .replace("{line}", &line.to_string())
            .replace("{stack}", stack)
            .replace("{code}", code)
    }

    pub fn get_auto_continue_prompt(&self, step: &str) -> String {
        self.plan.auto_continue.replace("{step}", step)
    }

    pub fn get_approval_prompt(&self, step: &str) -> String {
        self.plan.approval.replace("{step}", step)
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                instructions: r#"You are "OneClick Studio", a world-class Full-Stack AI Engineer.
Your goal is to build 100% COMPLETE, functional, and production-ready applications in a SINGLE TURN.

### MANDATORY RULES:
1. **ZERO QUESTIONS ON START:** When a user gives an initial instruction (e.g., "Build an e-commerce app"), you MUST NOT ask any questions. Assume professional defaults and build EVERYTHING immediately.
2. **FULL IMPLEMENTATION:** Your first response MUST contain all necessary files (HTML, CSS, JS, SQL) in the "files" object. Do NOT build a skeleton or "Step 1". Build the whole app.
3. **NO BLOCKING:** Do NOT provide a "plan" that requires approval on the first turn. Just execute.
4. **POST-BUILD INTERACTION:** Only after the full app is built, if the user asks for a modification, edit, or deletion, you may ask clarifying questions if necessary.
5. **WORKSPACES:** End-user mobile UI lives under "app/", the management dashboard under "admin/".

### RESPONSE FORMAT (JSON ONLY):
{
  "thought": "Internal reasoning.",
  "questions": [],
  "plan": [],
  "answer": "What you built and how the app now works.",
  "files": {
    "app/index.html": "...",
    "app/main.js": "...",
    "database.sql": "..."
  }
}

### DESIGN RULES:
- High-end modern UI (Tailwind CSS).
- Fully functional logic (Cart, Search, Filters, etc.).
- No placeholders. Use realistic sample data."#
                    .to_string(),
            },
            repair: RepairConfig {
                template: r#"CRITICAL SYSTEM ERROR DETECTED IN WORKSPACE:
- Error: "{message}"
- File: "{file}"
- Line: {line}
- Stack Trace: {stack}

INSTRUCTION:
Analyzing the current code of "{file}":
--- START CODE ---
{code}
--- END CODE ---

Identify the cause of the error (e.g., missing variable, syntax error, or bad reference) and FIX it.
Return the updated files in the standard JSON format. ONLY return the fixed files.
In the "answer" field, explain what you fixed in 1 short sentence."#
                    .to_string(),
            },
            plan: PlanConfig {
                auto_continue: "AUTONOMOUS EXECUTION: Proceeding with next step: {step}".to_string(),
                approval: "DECISION: User confirmed. Execute the plan: {step}".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_prompts_describe_envelope() {
        let prompts = PromptsConfig::default();
        let system = prompts.get_system_instructions();
        for key in ["\"thought\"", "\"answer\"", "\"files\"", "\"plan\"", "\"questions\""] {
            assert!(system.contains(key), "missing {}", key);
        }
    }

    #[test]
    fn test_templates_fill_placeholders() {
        let prompts = PromptsConfig::default();
        let repair = prompts.get_repair_prompt("x is not defined", "app/main.js", 12, "No stack provided", "x();");
        assert!(repair.contains("- Error: \"x is not defined\""));
        assert!(repair.contains("- Line: 12"));
        assert!(repair.contains("--- START CODE ---\nx();\n--- END CODE ---"));
        assert!(!repair.contains('{'));

        assert_eq!(
            prompts.get_auto_continue_prompt("Add login"),
            "AUTONOMOUS EXECUTION: Proceeding with next step: Add login"
        );
    }

    #[test]
    fn test_prompts_parse_from_toml() {
        let serialized = toml::to_string(&PromptsConfig::default()).unwrap();
        let parsed: PromptsConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.plan.approval, PromptsConfig::default().plan.approval);
    }
}
