use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;

use clap::{Args, Parser, Subcommand};
use directories::ProjectDirs;
use serde::Serialize;
use serde_json::{Value, json};
use sitepass_core::{CredentialVault, StorageError, VaultError};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;
use zeroize::Zeroize;

mod config;

use config::{AppConfig, config_get, config_set, load_config, save_config};

const JSON_SCHEMA_VERSION: u8 = 1;
const DEFAULT_VAULT_FILE: &str = "logins.spv";
const LOG_ROTATE_BYTES: u64 = 10 * 1024 * 1024;

static LOG_CONTEXT: OnceLock<LogContext> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone)]
struct LogContext {
    level: LogLevel,
    correlation_id: String,
    log_path: PathBuf,
}

fn init_logging(config: &AppConfig) {
    if LOG_CONTEXT.get().is_some() {
        return;
    }

    let project_dirs = match ProjectDirs::from("", "", "sitepass") {
        Some(value) => value,
        None => return,
    };
    let state_dir = match project_dirs.state_dir() {
        Some(value) => value,
        None => return,
    };
    let log_path = state_dir.join("sitepass.log");
    if let Some(parent) = log_path.parent()
        && std::fs::create_dir_all(parent).is_err()
    {
        return;
    }

    let level_raw = std::env::var("SITEPASS_LOG").unwrap_or_else(|_| config.logging.level.clone());
    let level = LogLevel::parse(&level_raw).unwrap_or(LogLevel::Info);
    let context = LogContext {
        level,
        correlation_id: Uuid::new_v4().to_string(),
        log_path,
    };
    let _ = rotate_log_if_needed(&context.log_path);
    let _ = LOG_CONTEXT.set(context);
}

fn audit_event(event: &str, fields: Value) {
    let mut object = serde_json::Map::new();
    object.insert("event".to_owned(), json!(event));
    if let Value::Object(extra) = fields {
        for (key, value) in extra {
            object.insert(key, value);
        }
    } else {
        object.insert("fields".to_owned(), fields);
    }
    log_json_line(LogLevel::Info, event, "audit", Value::Object(object));
}

fn log_json_line(level: LogLevel, msg: &str, module: &str, fields: Value) {
    let context = match LOG_CONTEXT.get() {
        Some(value) => value,
        None => return,
    };
    if level > context.level {
        return;
    }

    let ts = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string());

    let mut object = serde_json::Map::new();
    object.insert("ts".to_owned(), json!(ts));
    object.insert("level".to_owned(), json!(level.as_str()));
    object.insert("msg".to_owned(), json!(msg));
    object.insert(
        "correlation_id".to_owned(),
        json!(context.correlation_id.as_str()),
    );
    object.insert("module".to_owned(), json!(module));

    match scrub_log_value(fields) {
        Value::Object(extra) => {
            for (key, value) in extra {
                object.insert(key, value);
            }
        }
        other => {
            object.insert("fields".to_owned(), other);
        }
    }

    let line = match serde_json::to_string(&Value::Object(object)) {
        Ok(value) => value,
        Err(_) => return,
    };

    let _ = rotate_log_if_needed(&context.log_path);
    let mut file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&context.log_path)
    {
        Ok(value) => value,
        Err(_) => return,
    };
    let _ = writeln!(file, "{line}");
}

fn rotate_log_if_needed(path: &Path) -> Result<(), std::io::Error> {
    let metadata = match std::fs::metadata(path) {
        Ok(value) => value,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(error) => return Err(error),
    };
    if metadata.len() < LOG_ROTATE_BYTES {
        return Ok(());
    }

    let rotated = path.with_extension("log.1");
    if rotated.exists() {
        let _ = std::fs::remove_file(&rotated);
    }
    std::fs::rename(path, rotated)?;
    Ok(())
}

fn scrub_log_value(value: Value) -> Value {
    match value {
        Value::Object(values) => {
            let mut output = serde_json::Map::new();
            for (key, value) in values {
                if is_sensitive_log_key(&key) {
                    output.insert(key, json!("[REDACTED]"));
                } else {
                    output.insert(key, scrub_log_value(value));
                }
            }
            Value::Object(output)
        }
        Value::Array(values) => Value::Array(values.into_iter().map(scrub_log_value).collect()),
        other => other,
    }
}

fn is_sensitive_log_key(key: &str) -> bool {
    matches!(key, "key" | "token" | "payload" | "logins")
        || key.to_ascii_lowercase().contains("password")
        || key.to_ascii_lowercase().contains("secret")
}

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
enum CliExitCode {
    Success = 0,
    General = 1,
    Usage = 2,
    VaultNotFound = 3,
    AuthFailed = 4,
    VaultFileLocked = 5,
    CorruptOrParse = 6,
}

#[derive(Debug)]
struct CliError {
    code: CliExitCode,
    kind: &'static str,
    message: String,
}

impl CliError {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            code: CliExitCode::Usage,
            kind: "invalid_usage",
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self {
            code: CliExitCode::General,
            kind: "general",
            message: message.into(),
        }
    }
}

fn map_storage_error(error: StorageError) -> CliError {
    match error {
        StorageError::NotFound => CliError {
            code: CliExitCode::VaultNotFound,
            kind: "vault_not_found",
            message: "No vault file found. Run `sitepass vault init` to create one.".to_owned(),
        },
        StorageError::Truncated { len } => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "corrupt_container",
            message: format!(
                "Vault file is truncated ({len} bytes). Retrying with another password cannot help."
            ),
        },
        StorageError::Locked => CliError {
            code: CliExitCode::VaultFileLocked,
            kind: "vault_file_locked",
            message: "Vault file is locked by another process.".to_owned(),
        },
        StorageError::Io(error) => CliError {
            code: CliExitCode::General,
            kind: "io",
            message: format!("Vault I/O failed: {error}. The last change may not be saved."),
        },
    }
}

fn map_vault_error(error: VaultError) -> CliError {
    match error {
        VaultError::WrongPassword => CliError {
            code: CliExitCode::AuthFailed,
            kind: "wrong_password",
            message: "Wrong master password. Try again.".to_owned(),
        },
        VaultError::CorruptVault => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "corrupt_vault",
            message: "Vault decrypted but failed its integrity check. No password can open it."
                .to_owned(),
        },
        VaultError::EncryptionFailure | VaultError::RandomFailure => {
            CliError::general(error.to_string())
        }
        VaultError::Model(error) => CliError {
            code: CliExitCode::CorruptOrParse,
            kind: "payload_invalid",
            message: error.to_string(),
        },
        VaultError::Storage(error) => map_storage_error(error),
    }
}

fn map_io_error(error: std::io::Error) -> CliError {
    CliError::general(format!("I/O error: {error}"))
}

#[derive(Debug)]
struct CommandOutput {
    message: String,
    payload: Value,
}

#[derive(Debug, Parser)]
#[command(name = "sitepass")]
#[command(about = "Password-protected store of website logins", version)]
struct Cli {
    #[arg(long, global = true)]
    vault: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    quiet: bool,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    non_interactive: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Vault {
        #[command(subcommand)]
        command: VaultCommand,
    },
    Login {
        #[command(subcommand)]
        command: LoginCommand,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
enum VaultCommand {
    Init(VaultInitArgs),
    Status(VaultPathArgs),
    Check(VaultPathArgs),
}

#[derive(Debug, Subcommand)]
enum LoginCommand {
    Add(LoginPairArgs),
    Remove(LoginPairArgs),
    List(LoginListArgs),
    Usernames(OriginArgs),
    Show(LoginPairArgs),
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

#[derive(Debug, Args)]
struct VaultPathArgs {
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct VaultInitArgs {
    path: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Debug, Args)]
struct LoginPairArgs {
    origin: String,
    username: String,
    #[arg(long)]
    path: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct LoginListArgs {
    #[arg(long)]
    path: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    reveal: bool,
}

#[derive(Debug, Args)]
struct OriginArgs {
    origin: String,
    #[arg(long)]
    path: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct JsonEnvelope {
    schema_version: u8,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonError>,
}

#[derive(Debug, Serialize)]
struct JsonError {
    code: u8,
    kind: String,
    message: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match execute(&cli) {
        Ok(output) => {
            if cli.json {
                let envelope = JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: true,
                    result: Some(output.payload),
                    error: None,
                };
                println!(
                    "{}",
                    serde_json::to_string(&envelope)
                        .expect("json envelope serialization should succeed")
                );
            } else if !cli.quiet {
                println!("{}", output.message);
            }
            ExitCode::from(CliExitCode::Success as u8)
        }
        Err(error) => {
            if cli.json {
                let envelope = JsonEnvelope {
                    schema_version: JSON_SCHEMA_VERSION,
                    ok: false,
                    result: None,
                    error: Some(JsonError {
                        code: error.code as u8,
                        kind: error.kind.to_owned(),
                        message: error.message.clone(),
                    }),
                };
                println!(
                    "{}",
                    serde_json::to_string(&envelope)
                        .expect("json envelope serialization should succeed")
                );
            } else {
                eprintln!("{}", error.message);
            }
            ExitCode::from(error.code as u8)
        }
    }
}

fn execute(cli: &Cli) -> Result<CommandOutput, CliError> {
    let (mut config, config_path) = load_config(cli.config.clone()).map_err(CliError::general)?;
    init_logging(&config);

    match &cli.command {
        Command::Vault { command } => match command {
            VaultCommand::Init(args) => handle_vault_init(cli, &config, args),
            VaultCommand::Status(args) => handle_vault_status(cli, &config, args),
            VaultCommand::Check(args) => handle_vault_check(cli, &config, args),
        },
        Command::Login { command } => match command {
            LoginCommand::Add(args) => handle_login_add(cli, &config, args),
            LoginCommand::Remove(args) => handle_login_remove(cli, &config, args),
            LoginCommand::List(args) => handle_login_list(cli, &config, args),
            LoginCommand::Usernames(args) => handle_login_usernames(cli, &config, args),
            LoginCommand::Show(args) => handle_login_show(cli, &config, args),
        },
        Command::Config { command } => handle_config(command, &mut config, &config_path),
    }
}

fn handle_vault_init(
    cli: &Cli,
    config: &AppConfig,
    args: &VaultInitArgs,
) -> Result<CommandOutput, CliError> {
    let path = resolve_vault_path(cli, config, args.path.clone())?;
    if sitepass_storage::vault_exists(&path) && !args.force {
        return Err(CliError::usage(format!(
            "A vault already exists at {}; pass --force to overwrite it",
            path.display()
        )));
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(map_io_error)?;
    }

    let mut password = read_master_password(cli.non_interactive, true)?;
    let result = CredentialVault::create(&path, &password);
    password.zeroize();
    let vault = result.map_err(map_vault_error)?;

    audit_event("vault_created", json!({ "vault_path": path }));

    Ok(CommandOutput {
        message: format!("Created vault at {}", path.display()),
        payload: json!({
            "path": path,
            "login_count": vault.login_count()
        }),
    })
}

fn handle_vault_status(
    cli: &Cli,
    config: &AppConfig,
    args: &VaultPathArgs,
) -> Result<CommandOutput, CliError> {
    let path = resolve_vault_path(cli, config, args.path.clone())?;
    let exists = sitepass_storage::vault_exists(&path);
    let bytes = if exists {
        std::fs::metadata(&path).map_err(map_io_error)?.len()
    } else {
        0
    };

    let message = if exists {
        format!("Vault at {} ({bytes} bytes)", path.display())
    } else {
        format!("No vault at {}", path.display())
    };
    Ok(CommandOutput {
        message,
        payload: json!({
            "path": path,
            "exists": exists,
            "bytes": bytes
        }),
    })
}

fn handle_vault_check(
    cli: &Cli,
    config: &AppConfig,
    args: &VaultPathArgs,
) -> Result<CommandOutput, CliError> {
    let (path, vault) = unlock_vault(cli, config, args.path.clone())?;

    Ok(CommandOutput {
        message: format!(
            "Vault check passed for {} ({} logins)",
            path.display(),
            vault.login_count()
        ),
        payload: json!({
            "path": path,
            "login_count": vault.login_count()
        }),
    })
}

fn handle_login_add(
    cli: &Cli,
    config: &AppConfig,
    args: &LoginPairArgs,
) -> Result<CommandOutput, CliError> {
    let (path, mut vault) = unlock_vault(cli, config, args.path.clone())?;

    let mut password = read_site_password(cli.non_interactive, &args.origin, &args.username)?;
    let result = vault.save_password(&args.origin, &args.username, &password);
    password.zeroize();
    result.map_err(map_vault_error)?;

    audit_event(
        "login_saved",
        json!({
            "vault_path": path,
            "origin": args.origin,
            "username": args.username
        }),
    );

    Ok(CommandOutput {
        message: format!("Saved login for {} at {}", args.username, args.origin),
        payload: json!({
            "origin": args.origin,
            "username": args.username,
            "login_count": vault.login_count()
        }),
    })
}

fn handle_login_remove(
    cli: &Cli,
    config: &AppConfig,
    args: &LoginPairArgs,
) -> Result<CommandOutput, CliError> {
    let (path, mut vault) = unlock_vault(cli, config, args.path.clone())?;
    vault
        .delete_password(&args.origin, &args.username)
        .map_err(map_vault_error)?;

    audit_event(
        "login_deleted",
        json!({
            "vault_path": path,
            "origin": args.origin,
            "username": args.username
        }),
    );

    Ok(CommandOutput {
        message: format!("Removed login for {} at {}", args.username, args.origin),
        payload: json!({
            "origin": args.origin,
            "username": args.username,
            "login_count": vault.login_count()
        }),
    })
}

fn handle_login_list(
    cli: &Cli,
    config: &AppConfig,
    args: &LoginListArgs,
) -> Result<CommandOutput, CliError> {
    let (_, vault) = unlock_vault(cli, config, args.path.clone())?;

    let mut lines = Vec::new();
    let mut entries = Vec::new();
    for login in vault.get_all_logins() {
        let shown = if args.reveal {
            login.password.as_str()
        } else {
            "********"
        };
        lines.push(format!("{}\t{}\t{shown}", login.origin, login.username));
        entries.push(json!({
            "url": login.origin,
            "username": login.username,
            "password": if args.reveal { Value::from(login.password.as_str()) } else { Value::Null }
        }));
    }

    let message = if lines.is_empty() {
        "No saved logins".to_owned()
    } else {
        lines.join("\n")
    };
    let login_count = entries.len();
    Ok(CommandOutput {
        message,
        payload: json!({ "logins": entries, "login_count": login_count }),
    })
}

fn handle_login_usernames(
    cli: &Cli,
    config: &AppConfig,
    args: &OriginArgs,
) -> Result<CommandOutput, CliError> {
    let (_, vault) = unlock_vault(cli, config, args.path.clone())?;
    let usernames = vault.find_usernames(&args.origin);

    Ok(CommandOutput {
        message: usernames.join("\n"),
        payload: json!({
            "origin": args.origin,
            "usernames": usernames
        }),
    })
}

fn handle_login_show(
    cli: &Cli,
    config: &AppConfig,
    args: &LoginPairArgs,
) -> Result<CommandOutput, CliError> {
    let (_, vault) = unlock_vault(cli, config, args.path.clone())?;

    // Autofill bridge contract: absent flattens to the empty string, and
    // callers treat an empty string as "no credential".
    let password = vault
        .find_password(&args.origin, &args.username)
        .unwrap_or_default();

    Ok(CommandOutput {
        message: password.to_owned(),
        payload: json!({
            "origin": args.origin,
            "username": args.username,
            "password": password
        }),
    })
}

fn handle_config(
    command: &ConfigCommand,
    config: &mut AppConfig,
    config_path: &Path,
) -> Result<CommandOutput, CliError> {
    match command {
        ConfigCommand::Get { key } => {
            let value = config_get(config, key).map_err(CliError::usage)?;
            Ok(CommandOutput {
                message: value.clone(),
                payload: json!({ "key": key, "value": value }),
            })
        }
        ConfigCommand::Set { key, value } => {
            config_set(config, key, value).map_err(CliError::usage)?;
            save_config(config, config_path).map_err(CliError::general)?;
            Ok(CommandOutput {
                message: format!("Set {key}"),
                payload: json!({ "key": key, "value": value }),
            })
        }
        ConfigCommand::List => {
            let rendered = toml::to_string_pretty(config)
                .map_err(|error| CliError::general(error.to_string()))?;
            Ok(CommandOutput {
                message: rendered,
                payload: serde_json::to_value(&*config).unwrap_or(Value::Null),
            })
        }
    }
}

/// Explicit flag beats config beats the per-user data directory default.
fn resolve_vault_path(
    cli: &Cli,
    config: &AppConfig,
    arg_path: Option<PathBuf>,
) -> Result<PathBuf, CliError> {
    if let Some(path) = arg_path {
        return Ok(path);
    }
    if let Some(path) = &cli.vault {
        return Ok(path.clone());
    }
    if let Some(path) = &config.default_vault {
        return Ok(PathBuf::from(path));
    }
    let project_dirs = ProjectDirs::from("", "", "sitepass")
        .ok_or_else(|| CliError::general("unable to resolve a vault path"))?;
    Ok(project_dirs.data_dir().join(DEFAULT_VAULT_FILE))
}

fn unlock_vault(
    cli: &Cli,
    config: &AppConfig,
    arg_path: Option<PathBuf>,
) -> Result<(PathBuf, CredentialVault), CliError> {
    let path = resolve_vault_path(cli, config, arg_path)?;
    let mut password = read_master_password(cli.non_interactive, false)?;
    let result = CredentialVault::open(&path, &password);
    password.zeroize();

    match result {
        Ok(vault) => {
            audit_event("vault_unlock_success", json!({ "vault_path": path }));
            Ok((path, vault))
        }
        Err(error) => {
            audit_event(
                "vault_unlock_failure",
                json!({ "vault_path": path, "reason": error.to_string() }),
            );
            Err(map_vault_error(error))
        }
    }
}

fn read_master_password(non_interactive: bool, confirm: bool) -> Result<String, CliError> {
    if non_interactive {
        return read_line_from_stdin();
    }

    let password =
        rpassword::prompt_password("Master password: ").map_err(map_io_error)?;
    if confirm {
        let mut confirmation =
            rpassword::prompt_password("Confirm master password: ").map_err(map_io_error)?;
        let matches = confirmation == password;
        confirmation.zeroize();
        if !matches {
            return Err(CliError::usage("passwords do not match"));
        }
    }
    Ok(password)
}

fn read_site_password(
    non_interactive: bool,
    origin: &str,
    username: &str,
) -> Result<String, CliError> {
    if non_interactive {
        return read_line_from_stdin();
    }
    rpassword::prompt_password(format!("Password for {username} at {origin}: "))
        .map_err(map_io_error)
}

fn read_line_from_stdin() -> Result<String, CliError> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(map_io_error)?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}
