use std::process::ExitCode;

use anyhow::Result;

use crate::context::CliContext;

pub fn register(ctx: &CliContext, name: &str, agent_type: &str) -> Result<ExitCode> {
    let registry = ctx.registry();
    let instance = registry.register(name, agent_type)?;
    println!("registered {} ({})", instance.name, instance.agent_type);
    Ok(ExitCode::SUCCESS)
}

pub fn unregister(ctx: &CliContext, name: &str) -> Result<ExitCode> {
    let registry = ctx.registry();
    if registry.unregister(name)? {
        println!("unregistered {name}");
    } else {
        println!("warning: {name} was not registered");
    }
    Ok(ExitCode::SUCCESS)
}

pub fn active(ctx: &CliContext) -> Result<ExitCode> {
    let instances = ctx.registry().active();
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
    } else {
        for instance in &instances {
            println!(
                "{}\t{}\tregistered {}",
                instance.name,
                instance.agent_type,
                instance.registered_at.format("%Y-%m-%d %H:%M")
            );
        }
        println!("{} active agent(s)", instances.len());
    }
    Ok(ExitCode::SUCCESS)
}

pub fn list_types(ctx: &CliContext) -> Result<ExitCode> {
    let registry = ctx.registry();
    for def in registry.catalog().all() {
        println!("{}\tcapacity {}\t{}", def.name, def.capacity_limit, def.description);
    }
    Ok(ExitCode::SUCCESS)
}

pub fn show_type(ctx: &CliContext, agent_type: &str) -> Result<ExitCode> {
    let registry = ctx.registry();
    match registry.catalog().get(agent_type) {
        Some(def) => {
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(def)?);
            } else {
                println!("name: {}", def.name);
                println!("description: {}", def.description);
                println!("capacity_limit: {}", def.capacity_limit);
                println!(
                    "capabilities: {}",
                    def.capabilities.iter().cloned().collect::<Vec<_>>().join(", ")
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("error: unknown type `{agent_type}`");
            Ok(ExitCode::FAILURE)
        }
    }
}

pub fn validate(ctx: &CliContext, agent_type: &str) -> Result<ExitCode> {
    if ctx.registry().validate(agent_type) {
        println!("{agent_type}: valid");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{agent_type}: unknown type");
        Ok(ExitCode::FAILURE)
    }
}

pub fn capabilities(ctx: &CliContext, agent_type: &str) -> Result<ExitCode> {
    let caps = ctx.registry().capabilities(agent_type)?;
    println!("{}", caps.join(", "));
    Ok(ExitCode::SUCCESS)
}
