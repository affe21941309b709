use anyhow::{anyhow, Result};

use crate::controller::LoopHandle;

/// Commands accepted on the interactive settings console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Sensitivity(f32),
    Volume(f32),
    Speech(bool),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start | stop | sensitivity <0.1-0.9> | volume <0-1> | speech on|off | status | quit";

pub fn parse_command(line: &str) -> Result<ConsoleCommand> {
    let mut parts = line.split_whitespace();
    let verb = parts.next().ok_or_else(|| anyhow!("empty command"))?;
    let arg = parts.next();
    if parts.next().is_some() {
        return Err(anyhow!("too many arguments"));
    }

    let number = |name: &str| -> Result<f32> {
        arg.ok_or_else(|| anyhow!("{} needs a value", name))?
            .parse::<f32>()
            .map_err(|e| anyhow!("invalid {}: {}", name, e))
    };

    let verb = verb.to_lowercase();
    let takes_value = matches!(verb.as_str(), "sensitivity" | "volume" | "speech");
    if !takes_value {
        if let Some(extra) = arg {
            return Err(anyhow!("{} takes no argument (got '{}')", verb, extra));
        }
    }

    match verb.as_str() {
        "start" => Ok(ConsoleCommand::Start),
        "stop" => Ok(ConsoleCommand::Stop),
        "sensitivity" => Ok(ConsoleCommand::Sensitivity(number("sensitivity")?)),
        "volume" => Ok(ConsoleCommand::Volume(number("volume")?)),
        "speech" => match arg {
            Some("on") => Ok(ConsoleCommand::Speech(true)),
            Some("off") => Ok(ConsoleCommand::Speech(false)),
            _ => Err(anyhow!("speech takes 'on' or 'off'")),
        },
        "status" => Ok(ConsoleCommand::Status),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        other => Err(anyhow!("unknown command '{}'", other)),
    }
}

/// Forward one console command to the loop. Returns `false` once the user quits.
pub async fn dispatch(handle: &LoopHandle, command: ConsoleCommand) -> Result<bool> {
    match command {
        ConsoleCommand::Start => handle.start().await?,
        ConsoleCommand::Stop => handle.stop().await?,
        ConsoleCommand::Sensitivity(v) => handle.set_sensitivity(v).await?,
        ConsoleCommand::Volume(v) => handle.set_volume(v).await?,
        ConsoleCommand::Speech(on) => handle.set_speech_enabled(on).await?,
        ConsoleCommand::Status => {
            println!("{}", serde_json::to_string_pretty(&handle.status())?);
        }
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => {
            handle.shutdown().await?;
            return Ok(false);
        }
    }
    Ok(true)
}
