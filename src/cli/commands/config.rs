//! Config command - show or edit configuration

use super::Project;
use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager, LOCAL_CONFIG_NAME};
use crate::error::{BeaverError, BeaverResult};
use crate::ui::{self, UiContext};
use tokio::fs;

/// Keys accepted by `config set`, besides `env.<NAME>`
const KEYS: [&str; 6] = [
    "general.log_format",
    "general.event_log",
    "build.concurrency",
    "build.digest_file",
    "build.manifest",
    "build.fail_fast",
];

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, project: &Project) -> BeaverResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(&project.config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value, local }) => {
            validate_config_key(&key)?;
            let path = if local {
                project.root.join(LOCAL_CONFIG_NAME)
            } else {
                manager.path().to_path_buf()
            };
            set_value(&path, &key, &value).await?;
            let ctx = UiContext::detect();
            ui::step_ok(&ctx, &format!("Set {} = {} in {}", key, value, path.display()));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> BeaverResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> BeaverResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;

    ui::step_ok_detail(
        &ctx,
        "Configuration initialized",
        &path.display().to_string(),
    );

    Ok(())
}

/// Validate that a config key is one we recognise
fn validate_config_key(key: &str) -> BeaverResult<()> {
    match key.split_once('.') {
        Some(("env", name)) if !name.is_empty() && !name.contains('.') => Ok(()),
        _ if KEYS.contains(&key) => Ok(()),
        _ => Err(BeaverError::User(format!(
            "Unknown config key: {} (valid keys: {}, env.<NAME>)",
            key,
            KEYS.join(", ")
        ))),
    }
}

/// Set a key in a TOML file, keeping only what the file already holds
///
/// The result is validated against the schema before it is written.
async fn set_value(path: &std::path::Path, key: &str, value: &str) -> BeaverResult<()> {
    let mut doc: toml::Value = if path.exists() {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| BeaverError::io(format!("reading {}", path.display()), e))?;
        content
            .parse::<toml::Table>()
            .map(toml::Value::Table)
            .map_err(|e| BeaverError::ConfigInvalid {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?
    } else {
        toml::Value::Table(toml::map::Map::new())
    };

    set_toml_value(&mut doc, key, value)?;

    let _: Config = doc
        .clone()
        .try_into()
        .map_err(|e: toml::de::Error| BeaverError::User(format!("Invalid value for {}: {}", key, e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BeaverError::ConfigDirCreate {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }
    }
    let content = toml::to_string_pretty(&doc)?;
    fs::write(path, content)
        .await
        .map_err(|e| BeaverError::io(format!("writing {}", path.display()), e))
}

/// Set a dot-separated key in a TOML value tree, creating intermediate tables as needed
fn set_toml_value(doc: &mut toml::Value, key: &str, value: &str) -> BeaverResult<()> {
    let (sections, leaf) = key
        .rsplit_once('.')
        .ok_or_else(|| BeaverError::User(format!("Expected section.key, got: {}", key)))?;

    let mut current = doc;
    for part in sections.split('.') {
        current = current
            .as_table_mut()
            .ok_or_else(|| BeaverError::User(format!("Expected table at key: {}", part)))?
            .entry(part)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    let table = current
        .as_table_mut()
        .ok_or_else(|| BeaverError::User(format!("Expected table for key: {}", key)))?;

    // Environment values are always strings
    let toml_value = if sections == "env" {
        toml::Value::String(value.to_string())
    } else if let Ok(flag) = value.parse::<bool>() {
        toml::Value::Boolean(flag)
    } else if let Ok(n) = value.parse::<i64>() {
        toml::Value::Integer(n)
    } else {
        toml::Value::String(value.to_string())
    };

    table.insert(leaf.to_string(), toml_value);
    Ok(())
}
