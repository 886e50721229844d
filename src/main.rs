use std::sync::Arc;

use skillchat_backend::api::server::serve;
use skillchat_backend::chat::repl::run_repl;
use skillchat_backend::chat::ChatService;
use skillchat_backend::config::{AppConfig, ProviderKind};
use skillchat_backend::default_app_root;
use skillchat_backend::manager::{serve_manager, ProcessServerControl};
use skillchat_backend::skills::{list_skills, AutoSelectStrategy};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Serve,
    Manager,
    ListSkills,
    Ask(AskCliArgs),
    Chat(ChatCliArgs),
    Help,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ChatCliArgs {
    skill: Option<String>,
    strategy: Option<AutoSelectStrategy>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AskCliArgs {
    skill: Option<String>,
    strategy: Option<AutoSelectStrategy>,
    message: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let command = parse_cli_command(cli_args.as_slice())?;
    if command == CliCommand::Help {
        print_usage();
        return Ok(());
    }

    let app_root = default_app_root();
    let config = AppConfig::from_env(app_root.as_path())?;

    match command {
        CliCommand::Serve => {
            config.log_summary();
            serve(&config).await?;
        }
        CliCommand::Manager => {
            let control = Arc::new(ProcessServerControl::new(config.bind.port(), app_root));
            serve_manager(config.manager_port, control).await?;
        }
        CliCommand::ListSkills => run_list_skills_cli(&config)?,
        CliCommand::Ask(args) => {
            tokio::task::spawn_blocking(move || run_ask_cli(&config, args))
                .await?
                .map_err(|error| -> Box<dyn std::error::Error> { error })?;
        }
        CliCommand::Chat(args) => {
            tokio::task::spawn_blocking(move || run_chat_cli(&config, args))
                .await?
                .map_err(|error| -> Box<dyn std::error::Error> { error })?;
        }
        CliCommand::Help => {}
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}

fn parse_cli_command(args: &[String]) -> Result<CliCommand, Box<dyn std::error::Error>> {
    if args
        .iter()
        .any(|arg| matches!(arg.as_str(), "-h" | "--help"))
    {
        return Ok(CliCommand::Help);
    }

    match args.first().map(String::as_str) {
        None | Some("serve") => Ok(CliCommand::Serve),
        Some("manager") => Ok(CliCommand::Manager),
        Some("list-skills") => Ok(CliCommand::ListSkills),
        Some("ask") => Ok(CliCommand::Ask(parse_ask_cli_args(&args[1..])?)),
        Some("chat") => Ok(CliCommand::Chat(parse_chat_cli_args(&args[1..])?)),
        Some(unknown) => Err(std::io::Error::other(format!(
            "Unknown command: {unknown}\n\nUse --help for usage."
        ))
        .into()),
    }
}

struct SkillFlags {
    skill: Option<String>,
    strategy: Option<AutoSelectStrategy>,
    words: Vec<String>,
}

fn parse_skill_flags(args: &[String]) -> Result<SkillFlags, Box<dyn std::error::Error>> {
    let mut skill = None::<String>;
    let mut strategy = None::<AutoSelectStrategy>;
    let mut words = Vec::new();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--skill" => {
                let Some(value) = args.get(i + 1) else {
                    return Err(std::io::Error::other(format!("Missing value for {flag}")).into());
                };
                skill = Some(value.clone());
                i += 2;
            }
            "--keyword" => {
                strategy = Some(AutoSelectStrategy::Keyword);
                i += 1;
            }
            "--model" => {
                strategy = Some(AutoSelectStrategy::Model);
                i += 1;
            }
            unknown if unknown.starts_with("--") => {
                return Err(std::io::Error::other(format!(
                    "Unknown argument: {unknown}\n\nUse --help for usage."
                ))
                .into());
            }
            word => {
                words.push(word.to_string());
                i += 1;
            }
        }
    }
    Ok(SkillFlags {
        skill: skill
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()),
        strategy,
        words,
    })
}

fn parse_ask_cli_args(args: &[String]) -> Result<AskCliArgs, Box<dyn std::error::Error>> {
    let flags = parse_skill_flags(args)?;
    let message = flags.words.join(" ").trim().to_string();
    if message.is_empty() {
        return Err(std::io::Error::other("Missing message for ask").into());
    }
    Ok(AskCliArgs {
        skill: flags.skill,
        strategy: flags.strategy,
        message,
    })
}

fn parse_chat_cli_args(args: &[String]) -> Result<ChatCliArgs, Box<dyn std::error::Error>> {
    let flags = parse_skill_flags(args)?;
    if let Some(word) = flags.words.first() {
        return Err(std::io::Error::other(format!(
            "Unexpected argument for chat: {word}\n\nUse --help for usage."
        ))
        .into());
    }
    Ok(ChatCliArgs {
        skill: flags.skill,
        strategy: flags.strategy,
    })
}

fn run_list_skills_cli(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let skills = list_skills(config.skills_dir.as_path())?;
    if skills.is_empty() {
        println!("No skills found in {}", config.skills_dir.display());
        return Ok(());
    }
    for skill in skills {
        println!("- {}: {}", skill.name, skill.description);
    }
    Ok(())
}

fn run_ask_cli(
    config: &AppConfig,
    args: AskCliArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = ChatService::new(
        config.skills_dir.clone(),
        config.build_backend(),
        config.build_locator(),
        config.provider.chat_model(),
        args.strategy.unwrap_or(config.auto_select),
    );
    let outcome = service.ask_once(args.message.as_str(), args.skill.as_deref())?;
    eprintln!(
        "[skill: {} via {}]",
        outcome.skill.as_deref().unwrap_or("none"),
        outcome.source.as_str()
    );
    println!("{}", outcome.reply);
    Ok(())
}

fn run_chat_cli(
    config: &AppConfig,
    args: ChatCliArgs,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let service = ChatService::new(
        config.skills_dir.clone(),
        config.build_backend(),
        config.build_locator(),
        config.provider.chat_model(),
        args.strategy.unwrap_or(config.auto_select),
    );
    if let Some(name) = args.skill.as_deref() {
        if !service.list_skills()?.iter().any(|skill| skill.name == name) {
            return Err(std::io::Error::other(format!(
                "Skill not found: {name} (in {})",
                config.skills_dir.display()
            ))
            .into());
        }
    }

    let assistant_label = match config.provider.kind {
        ProviderKind::DeepSeek => "DeepSeek",
        ProviderKind::Ollama => "AI",
    };
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_repl(
        &service,
        args.skill.as_deref(),
        assistant_label,
        stdin.lock(),
        stdout.lock(),
    )?;
    Ok(())
}

fn print_usage() {
    eprintln!(concat!(
        "Usage:\n",
        "  skillchat-backend [serve]\n",
        "  skillchat-backend manager\n",
        "  skillchat-backend list-skills\n",
        "  skillchat-backend ask [--skill NAME | --keyword | --model] <message>\n",
        "  skillchat-backend chat [--skill NAME | --keyword | --model]\n\n",
        "Configuration is read from the environment, then ./.env.\n"
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn no_arguments_serve() {
        assert_eq!(
            parse_cli_command(&[]).expect("parse should succeed"),
            CliCommand::Serve
        );
        assert_eq!(
            parse_cli_command(&args(&["manager"])).expect("parse should succeed"),
            CliCommand::Manager
        );
    }

    #[test]
    fn ask_collects_flags_and_message_words() {
        let parsed = parse_cli_command(&args(&["ask", "--keyword", "写一首", "诗", "--skill", "poet"]))
            .expect("parse should succeed");
        assert_eq!(
            parsed,
            CliCommand::Ask(AskCliArgs {
                skill: Some(String::from("poet")),
                strategy: Some(AutoSelectStrategy::Keyword),
                message: String::from("写一首 诗"),
            })
        );
    }

    #[test]
    fn ask_requires_a_message() {
        let err = parse_cli_command(&args(&["ask", "--model"])).expect_err("message is required");
        assert!(err.to_string().contains("Missing message"));
        let err = parse_cli_command(&args(&["ask", "--skill"])).expect_err("value is required");
        assert!(err.to_string().contains("--skill"));
    }

    #[test]
    fn chat_takes_flags_but_no_message() {
        assert_eq!(
            parse_cli_command(&args(&["chat"])).expect("parse should succeed"),
            CliCommand::Chat(ChatCliArgs {
                skill: None,
                strategy: None,
            })
        );
        assert_eq!(
            parse_cli_command(&args(&["chat", "--skill", "poet", "--keyword"]))
                .expect("parse should succeed"),
            CliCommand::Chat(ChatCliArgs {
                skill: Some(String::from("poet")),
                strategy: Some(AutoSelectStrategy::Keyword),
            })
        );
        let err = parse_cli_command(&args(&["chat", "hello"])).expect_err("stray word");
        assert!(err.to_string().contains("hello"));
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = parse_cli_command(&args(&["deploy"])).expect_err("unknown command");
        assert!(err.to_string().contains("deploy"));
    }
}
