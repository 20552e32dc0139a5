use std::path::Path;

use anyhow::bail;
use tierform_graph::{synthesize, StackName};

use super::Workspace;

pub fn synth(workspace: &Workspace, stack: Option<&str>, out: Option<&Path>) -> anyhow::Result<()> {
    let topology = workspace.topology()?;
    let mut templates = synthesize(&topology.graph)?;

    if let Some(name) = stack {
        let Some(wanted) = StackName::ALL.into_iter().find(|s| s.label() == name) else {
            bail!("unknown stack '{name}' (expected registry, application or delivery)");
        };
        templates.retain(|s, _| *s == wanted);
    }

    match out {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            for (stack, template) in &templates {
                let path = dir.join(format!("{}.template.json", stack.label()));
                std::fs::write(&path, serde_json::to_string_pretty(template)?)?;
                println!("✓ Wrote {}", path.display());
            }
        }
        None => {
            let all: serde_json::Map<String, serde_json::Value> = templates
                .into_iter()
                .map(|(stack, template)| (stack.label().to_string(), template))
                .collect();
            println!("{}", serde_json::to_string_pretty(&all)?);
        }
    }
    Ok(())
}
