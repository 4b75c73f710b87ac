//! Doctor command implementation.
//!
//! Validates external tools and workspace state before a training run.

use crate::config;
use colored::Colorize;
use sagedet_training::{CommandRunner, CommandSpec, ProcessRunner};
use serde_json::json;
use std::path::Path;

/// Tools the workflow shells out to; `required = false` only warns.
const TOOLS: &[(&str, &[&str], bool)] = &[
    ("git", &["--version"], true),
    ("docker", &["--version"], true),
    ("aws", &["--version"], true),
    ("tensorboard", &["--version_tb"], false),
];

struct ToolCheck {
    name: &'static str,
    required: bool,
    version: Option<String>,
}

async fn check_tool(runner: &dyn CommandRunner, name: &'static str, args: &[&str], required: bool) -> ToolCheck {
    let version = match runner.output(&CommandSpec::new(name).args(args.iter().copied())).await {
        Ok(output) if output.success() => {
            let text = if output.stdout.trim().is_empty() { output.stderr } else { output.stdout };
            Some(text.lines().next().unwrap_or_default().trim().to_string())
        }
        Ok(_) | Err(_) => None,
    };
    ToolCheck { name, required, version }
}

/// Execute the doctor command.
pub async fn execute(config_path: Option<&Path>, json_output: bool) -> anyhow::Result<()> {
    let runner = ProcessRunner;
    let mut tools = Vec::with_capacity(TOOLS.len());
    for &(name, args, required) in TOOLS {
        tools.push(check_tool(&runner, name, args, required).await);
    }

    let workflow = config::load(config_path);
    let tools_ok = tools.iter().all(|t| t.version.is_some() || !t.required);

    if json_output {
        let workspace = match workflow {
            Ok(ref w) => {
                let reference = w.layout.resolve(&w.config.assets.reference_file);
                json!({
                    "found": true,
                    "root": w.layout.root(),
                    "image_reference": reference.is_file(),
                    "checkpoints": w.config.checkpoint_specs(&w.layout).iter().map(|c| json!({
                        "destination": c.destination,
                        "present": c.destination.is_dir(),
                    })).collect::<Vec<_>>(),
                })
            }
            Err(ref e) => json!({ "found": false, "error": format!("{e:#}") }),
        };
        let out = json!({
            "ok": tools_ok && workflow.is_ok(),
            "tools": tools.iter().map(|t| json!({
                "name": t.name,
                "required": t.required,
                "found": t.version.is_some(),
                "version": t.version,
            })).collect::<Vec<_>>(),
            "workspace": workspace,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", "Sagedet Doctor - Environment Validation".bold().cyan());
    println!();

    println!("{}", "Tools:".bold());
    for tool in &tools {
        match (&tool.version, tool.required) {
            (Some(version), _) => println!("  {:<12} {} {}", tool.name, "✓".green(), version.dimmed()),
            (None, true) => println!("  {:<12} {}", tool.name, "✗ Not found".red()),
            (None, false) => println!("  {:<12} {}", tool.name, "⚠ Not found (optional)".yellow()),
        }
    }
    println!();

    println!("{}", "Workspace:".bold());
    match workflow {
        Ok(ref w) => {
            println!("  Status: {}", "✓ Found".green());
            println!("  Location: {}", w.layout.root().display().to_string().dimmed());

            let reference = w.layout.resolve(&w.config.assets.reference_file);
            if reference.is_file() {
                println!("  Image reference: {}", "✓".green());
            } else {
                println!("  Image reference: {}", "⚠ Missing (run `sagedet image build`)".yellow());
            }
            for spec in w.config.checkpoint_specs(&w.layout) {
                if spec.destination.is_dir() {
                    println!("  Checkpoint {}: {}", spec.destination.display(), "✓".green());
                } else {
                    println!(
                        "  Checkpoint {}: {}",
                        spec.destination.display(),
                        "⚠ Missing (run `sagedet checkpoints fetch`)".yellow()
                    );
                }
            }
        }
        Err(ref e) => {
            println!("  Status: {}", format!("✗ Not found - {e}").red());
            println!();
            println!("  {}", "Fix:".yellow());
            println!("    sagedet init");
        }
    }
    println!();

    if tools_ok && workflow.is_ok() {
        println!("{}", "All checks passed".bold().green());
        Ok(())
    } else {
        anyhow::bail!("Some checks failed")
    }
}
