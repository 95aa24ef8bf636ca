use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::runtime::Handle;

use forecast_cli::{
    config::{DEFAULT_LOG_FILTER, RuntimeConfig},
    controller::{ControllerDeps, ForecastController},
    error::{AppError, ErrorKind},
    gateway::{ForecastGateway, HttpGateway},
    location::{self, LocationProvider, LocationResolver},
    model::{ForecastFailure, ForecastOutcome},
    permissions::{LocationPermission, PermissionGate, StoredPermissions},
    preferences::{self, FilePreferenceStore, PreferenceError, PreferenceKey, PreferenceStore},
    presenter::{
        ForecastPresenter, ForecastScreen, ForecastView, PermissionPrompt, PermissionResponse,
        UserMessage,
    },
    session,
};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Weather forecast for your current location or a saved city"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Forecast for the current location (auto mode) or the saved city.
    Show {
        #[arg(long, value_enum)]
        output: Option<OutputModeArg>,
        #[arg(long)]
        json: bool,
        /// Never ask for location permission on the terminal.
        #[arg(long)]
        no_prompt: bool,
    },
    /// Read and change saved preferences.
    Config {
        #[arg(long, global = true)]
        json: bool,
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect and change the stored location permission.
    Permission {
        #[arg(long, global = true)]
        json: bool,
        #[command(subcommand)]
        action: PermissionAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Show every preference with its effective value.
    List,
    Get {
        key: String,
    },
    Set {
        key: String,
        value: String,
    },
    /// Remove a stored value so its default applies again.
    Unset {
        key: String,
    },
}

#[derive(Debug, Subcommand)]
enum PermissionAction {
    Status,
    Grant,
    /// Forget any earlier answer; the next `show` asks again.
    Revoke,
}

const ENVELOPE_SCHEMA_VERSION: &str = "v1";
const ERROR_CODE_USER_INVALID_INPUT: &str = "user.invalid_input";
const ERROR_CODE_USER_INVALID_CITY: &str = "user.invalid_city";
const ERROR_CODE_USER_LOCATION_PERMISSION_DENIED: &str = "user.location_permission_denied";
const ERROR_CODE_USER_OUTPUT_MODE_CONFLICT: &str = "user.output_mode_conflict";
const ERROR_CODE_RUNTIME_LOCATION_UNAVAILABLE: &str = "runtime.location_unavailable";
const ERROR_CODE_RUNTIME_PROVIDER_INIT: &str = "runtime.provider_init_failed";
const ERROR_CODE_RUNTIME_PROVIDER_FAILED: &str = "runtime.provider_failed";
const ERROR_CODE_RUNTIME_PREFERENCES: &str = "runtime.preferences_failed";
const ERROR_CODE_RUNTIME_INIT: &str = "runtime.runtime_init_failed";
const ERROR_CODE_RUNTIME_SERIALIZE: &str = "runtime.serialize_failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputModeArg {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliOutputMode {
    Human,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
}

impl CliError {
    fn user(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::User,
            code,
            message: message.into(),
        }
    }

    fn runtime(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Runtime,
            code,
            message: message.into(),
        }
    }

    fn exit_code(&self) -> i32 {
        match self.kind {
            ErrorKind::User => 2,
            ErrorKind::Runtime => 1,
        }
    }
}

impl From<OutputModeArg> for CliOutputMode {
    fn from(value: OutputModeArg) -> Self {
        match value {
            OutputModeArg::Human => CliOutputMode::Human,
            OutputModeArg::Json => CliOutputMode::Json,
        }
    }
}

impl From<PreferenceError> for CliError {
    fn from(value: PreferenceError) -> Self {
        map_app_error(AppError::from(value))
    }
}

impl Cli {
    fn command_name(&self) -> &'static str {
        match &self.command {
            Commands::Show { .. } => "forecast.show",
            Commands::Config { action, .. } => match action {
                ConfigAction::List => "forecast.config.list",
                ConfigAction::Get { .. } => "forecast.config.get",
                ConfigAction::Set { .. } => "forecast.config.set",
                ConfigAction::Unset { .. } => "forecast.config.unset",
            },
            Commands::Permission { action, .. } => match action {
                PermissionAction::Status => "forecast.permission.status",
                PermissionAction::Grant => "forecast.permission.grant",
                PermissionAction::Revoke => "forecast.permission.revoke",
            },
        }
    }

    fn output_mode_hint(&self) -> CliOutputMode {
        match &self.command {
            Commands::Show { output, json, .. } => {
                if *json {
                    CliOutputMode::Json
                } else if let Some(explicit) = output {
                    (*explicit).into()
                } else {
                    CliOutputMode::Human
                }
            }
            Commands::Config { json, .. } | Commands::Permission { json, .. } => {
                if *json {
                    CliOutputMode::Json
                } else {
                    CliOutputMode::Human
                }
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let command = cli.command_name();
    let output_mode = cli.output_mode_hint();
    let config = RuntimeConfig::from_env();
    init_tracing(&config.log_filter);

    match run(cli, &config) {
        Ok(output) => println!("{output}"),
        Err(error) => {
            emit_error(command, output_mode, &error);
            std::process::exit(error.exit_code());
        }
    }
}

fn init_tracing(filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(filter)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Network-facing collaborators, built only for commands that fetch.
struct Services {
    gateway: Arc<dyn ForecastGateway>,
    location: Arc<dyn LocationProvider>,
}

fn run(cli: Cli, config: &RuntimeConfig) -> Result<String, CliError> {
    let preferences: Arc<dyn PreferenceStore> =
        Arc::new(FilePreferenceStore::open(&config.config_dir)?);
    let for_services = Arc::clone(&preferences);
    run_with(cli, preferences, move || connect(config, for_services))
}

fn connect(
    config: &RuntimeConfig,
    preferences: Arc<dyn PreferenceStore>,
) -> Result<Services, CliError> {
    let gateway = HttpGateway::new(config)
        .map_err(|error| runtime_error(ERROR_CODE_RUNTIME_PROVIDER_INIT, error.to_string()))?;
    let location = location::provider_from_config(config, preferences)
        .map_err(|error| runtime_error(ERROR_CODE_RUNTIME_PROVIDER_INIT, error.to_string()))?;
    Ok(Services {
        gateway: Arc::new(gateway),
        location,
    })
}

fn run_with<F>(
    cli: Cli,
    preferences: Arc<dyn PreferenceStore>,
    connect: F,
) -> Result<String, CliError>
where
    F: FnOnce() -> Result<Services, CliError>,
{
    let command = cli.command_name();
    match cli.command {
        Commands::Show {
            output,
            json,
            no_prompt,
        } => {
            let output_mode = resolve_output_mode(output, json, CliOutputMode::Human)?;
            let services = connect()?;
            run_show(command, &preferences, &services, output_mode, no_prompt)
        }
        Commands::Config { json, action } => {
            run_config(preferences.as_ref(), action, command, json)
        }
        Commands::Permission { json, action } => {
            run_permission(preferences, action, command, json)
        }
    }
}

fn resolve_output_mode(
    output: Option<OutputModeArg>,
    json_flag: bool,
    default_mode: CliOutputMode,
) -> Result<CliOutputMode, CliError> {
    match (output.map(Into::into), json_flag) {
        (Some(mode), true) if mode != CliOutputMode::Json => Err(user_error(
            ERROR_CODE_USER_OUTPUT_MODE_CONFLICT,
            format!(
                "conflicting output flags: --json requires --output json (got {})",
                output_mode_label(mode)
            ),
        )),
        (Some(mode), _) => Ok(mode),
        (None, true) => Ok(CliOutputMode::Json),
        (None, false) => Ok(default_mode),
    }
}

/// Collects what the presenter shows; the command renders it once the
/// session has settled.
#[derive(Debug, Default)]
struct CollectingView {
    progress: bool,
    screen: Option<ForecastScreen>,
    messages: Vec<UserMessage>,
}

impl ForecastView for CollectingView {
    fn show_loading(&mut self) {
        if self.progress {
            eprintln!("Loading forecast...");
        }
    }

    fn show_forecast(&mut self, screen: &ForecastScreen) {
        self.screen = Some(screen.clone());
    }

    fn show_message(&mut self, message: UserMessage) {
        self.messages.push(message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliPrompt {
    Interactive,
    Disabled,
}

impl PermissionPrompt for CliPrompt {
    fn request_location_permission(&mut self) -> PermissionResponse {
        match self {
            CliPrompt::Disabled => PermissionResponse::Dismissed,
            CliPrompt::Interactive => ask_on_terminal(),
        }
    }
}

fn ask_on_terminal() -> PermissionResponse {
    let stdin = io::stdin();
    if !stdin.is_terminal() {
        return PermissionResponse::Dismissed;
    }

    eprint!("Allow forecast-cli to use your location? [y/n] ");
    let _ = io::stderr().flush();

    let mut answer = String::new();
    match stdin.lock().read_line(&mut answer) {
        Ok(0) | Err(_) => PermissionResponse::Dismissed,
        Ok(_) => parse_permission_answer(&answer),
    }
}

fn parse_permission_answer(answer: &str) -> PermissionResponse {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PermissionResponse::Granted,
        "n" | "no" => PermissionResponse::Denied,
        _ => PermissionResponse::Dismissed,
    }
}

fn run_show(
    command: &'static str,
    preferences: &Arc<dyn PreferenceStore>,
    services: &Services,
    output_mode: CliOutputMode,
    no_prompt: bool,
) -> Result<String, CliError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            runtime_error(
                ERROR_CODE_RUNTIME_INIT,
                format!("failed to start async runtime: {error}"),
            )
        })?;

    let interactive = output_mode == CliOutputMode::Human && !no_prompt;
    let prompt = if interactive {
        CliPrompt::Interactive
    } else {
        CliPrompt::Disabled
    };
    let view = CollectingView {
        progress: interactive,
        ..CollectingView::default()
    };
    let deps = ControllerDeps {
        preferences: Arc::clone(preferences),
        gateway: Arc::clone(&services.gateway),
        resolver: LocationResolver::new(
            Arc::new(StoredPermissions::new(Arc::clone(preferences))),
            Arc::clone(&services.location),
        ),
    };
    let mut presenter = ForecastPresenter::new(view, prompt, Arc::clone(preferences));

    // `services` outlives the runtime, so blocking HTTP clients are never
    // dropped on a runtime thread.
    let report = runtime
        .block_on(async {
            let controller = ForecastController::new(deps, Handle::current());
            session::run_session(&controller, &mut presenter).await
        })
        .map_err(|error| runtime_error(ERROR_CODE_RUNTIME_PROVIDER_FAILED, error.to_string()))?;
    let mode = preferences::request_mode(preferences.as_ref());
    let view = presenter.into_view();

    match report.outcome {
        ForecastOutcome::Success(_) => {
            let screen = view.screen.ok_or_else(|| {
                runtime_error(
                    ERROR_CODE_RUNTIME_PROVIDER_FAILED,
                    UserMessage::GenericError.text(),
                )
            })?;
            match output_mode {
                CliOutputMode::Json => {
                    let forecast = serde_json::to_value(&screen).map_err(|error| {
                        runtime_error(
                            ERROR_CODE_RUNTIME_SERIALIZE,
                            format!("failed to serialize forecast: {error}"),
                        )
                    })?;
                    render_json_envelope(
                        command,
                        json!({
                            "mode": mode.as_str(),
                            "reloads": report.reloads,
                            "forecast": forecast,
                        }),
                    )
                }
                CliOutputMode::Human => Ok(format_forecast_text(&screen)),
            }
        }
        ForecastOutcome::Failure(failure) => Err(failure_error(&failure, view.messages.last().copied())),
    }
}

fn failure_error(failure: &ForecastFailure, shown: Option<UserMessage>) -> CliError {
    match failure {
        ForecastFailure::InvalidCity => user_error(
            ERROR_CODE_USER_INVALID_CITY,
            format!(
                "{} Set one with `forecast-cli config set city_name <city>`.",
                shown.unwrap_or(UserMessage::InvalidCity).text()
            ),
        ),
        ForecastFailure::LocationPermissionDenied => user_error(
            ERROR_CODE_USER_LOCATION_PERMISSION_DENIED,
            format!(
                "{} Run `forecast-cli permission grant` or switch to a saved city with `forecast-cli config set is_auto_mode false`.",
                shown.unwrap_or(UserMessage::LocationAccessNotGranted).text()
            ),
        ),
        ForecastFailure::LocationRequestFailed => runtime_error(
            ERROR_CODE_RUNTIME_LOCATION_UNAVAILABLE,
            format!(
                "{} No location fix is available.",
                shown.unwrap_or(UserMessage::GenericError).text()
            ),
        ),
        ForecastFailure::Other(detail) => runtime_error(
            ERROR_CODE_RUNTIME_PROVIDER_FAILED,
            format!(
                "{} {detail}",
                shown.unwrap_or(UserMessage::GenericError).text()
            ),
        ),
    }
}

fn format_forecast_text(screen: &ForecastScreen) -> String {
    let current = &screen.current;
    let mut lines = vec![
        screen.title.clone(),
        format!(
            "{} {} {} (feels like {})",
            current.glyph, current.temperature, current.description, current.feels_like
        ),
        format!(
            "pressure {} | humidity {} | visibility {} | wind {}",
            current.pressure,
            current.humidity,
            current.visibility.as_deref().unwrap_or("n/a"),
            current.wind
        ),
        format!(
            "sunrise {} | sunset {}",
            current.sunrise.as_deref().unwrap_or("--"),
            current.sunset.as_deref().unwrap_or("--")
        ),
    ];

    for day in &screen.days {
        lines.push(format!(
            "{} {} {} ({} ~ {}) {}",
            day.date.as_deref().unwrap_or("--"),
            day.glyph,
            day.temperature,
            day.temp_min,
            day.temp_max,
            day.description
        ));
    }

    lines.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct PreferenceEntry {
    key: &'static str,
    value: Option<String>,
    source: &'static str,
}

fn describe_preference(store: &dyn PreferenceStore, key: PreferenceKey) -> PreferenceEntry {
    match store.get(key.as_str()) {
        Some(value) => PreferenceEntry {
            key: key.as_str(),
            value: Some(value),
            source: "stored",
        },
        None => PreferenceEntry {
            key: key.as_str(),
            value: key.default_value().map(str::to_string),
            source: "default",
        },
    }
}

fn format_preference_line(entry: &PreferenceEntry) -> String {
    let value = entry.value.as_deref().unwrap_or("(unset)");
    if entry.source == "default" {
        format!("{} = {} (default)", entry.key, value)
    } else {
        format!("{} = {}", entry.key, value)
    }
}

fn run_config(
    store: &dyn PreferenceStore,
    action: ConfigAction,
    command: &'static str,
    json: bool,
) -> Result<String, CliError> {
    let entries = match action {
        ConfigAction::List => PreferenceKey::ALL
            .into_iter()
            .map(|key| describe_preference(store, key))
            .collect::<Vec<_>>(),
        ConfigAction::Get { key } => {
            let key = PreferenceKey::parse(&key)?;
            vec![describe_preference(store, key)]
        }
        ConfigAction::Set { key, value } => {
            let key = PreferenceKey::parse(&key)?;
            preferences::set_validated(store, key, &value)?;
            vec![describe_preference(store, key)]
        }
        ConfigAction::Unset { key } => {
            let key = PreferenceKey::parse(&key)?;
            store.remove(key.as_str())?;
            vec![describe_preference(store, key)]
        }
    };

    if json {
        let preferences = serde_json::to_value(&entries).map_err(|error| {
            runtime_error(
                ERROR_CODE_RUNTIME_SERIALIZE,
                format!("failed to serialize preferences: {error}"),
            )
        })?;
        return render_json_envelope(command, json!({ "preferences": preferences }));
    }

    Ok(entries
        .iter()
        .map(format_preference_line)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn run_permission(
    store: Arc<dyn PreferenceStore>,
    action: PermissionAction,
    command: &'static str,
    json: bool,
) -> Result<String, CliError> {
    let permissions = StoredPermissions::new(store);
    match action {
        PermissionAction::Status => {}
        PermissionAction::Grant => permissions.grant_all()?,
        PermissionAction::Revoke => permissions.revoke_all()?,
    }

    let coarse = permissions.status(LocationPermission::Coarse);
    let fine = permissions.status(LocationPermission::Fine);
    let granted = permissions.has_location_permission();

    if json {
        return render_json_envelope(
            command,
            json!({
                "granted": granted,
                "coarse": coarse.as_str(),
                "fine": fine.as_str(),
            }),
        );
    }

    Ok(format!(
        "location permission: {}\ncoarse: {}\nfine: {}",
        if granted { "granted" } else { "not granted" },
        coarse.as_str(),
        fine.as_str()
    ))
}

fn render_json_envelope(command: &str, result: Value) -> Result<String, CliError> {
    serde_json::to_string(&json!({
        "schema_version": ENVELOPE_SCHEMA_VERSION,
        "command": command,
        "ok": true,
        "result": result,
    }))
    .map_err(|error| {
        runtime_error(
            ERROR_CODE_RUNTIME_SERIALIZE,
            format!("failed to serialize output envelope: {error}"),
        )
    })
}

fn emit_error(command: &str, output_mode: CliOutputMode, error: &CliError) {
    match output_mode {
        CliOutputMode::Json => {
            let payload = json!({
                "schema_version": ENVELOPE_SCHEMA_VERSION,
                "command": command,
                "ok": false,
                "error": {
                    "code": error.code,
                    "message": redact_sensitive(&error.message),
                    "details": {
                        "kind": error_kind_label(error.kind),
                        "exit_code": error.exit_code(),
                    }
                }
            });
            let rendered = serde_json::to_string(&payload).unwrap_or_else(|serialize_error| {
                format!(
                    "{{\"schema_version\":\"{}\",\"command\":\"{}\",\"ok\":false,\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
                    ENVELOPE_SCHEMA_VERSION,
                    command,
                    ERROR_CODE_RUNTIME_SERIALIZE,
                    escape_json_string(&format!(
                        "failed to serialize error envelope: {serialize_error}"
                    )),
                )
            });
            println!("{rendered}");
        }
        CliOutputMode::Human => {
            eprintln!(
                "error[{}]: {}",
                error.code,
                redact_sensitive(&error.message)
            );
        }
    }
}

fn user_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError::user(code, message)
}

fn runtime_error(code: &'static str, message: impl Into<String>) -> CliError {
    CliError::runtime(code, message)
}

fn map_app_error(error: AppError) -> CliError {
    match error.kind {
        ErrorKind::User => user_error(ERROR_CODE_USER_INVALID_INPUT, error.message),
        ErrorKind::Runtime => runtime_error(ERROR_CODE_RUNTIME_PREFERENCES, error.message),
    }
}

fn error_kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::User => "user",
        ErrorKind::Runtime => "runtime",
    }
}

fn output_mode_label(mode: CliOutputMode) -> &'static str {
    match mode {
        CliOutputMode::Human => "human",
        CliOutputMode::Json => "json",
    }
}

fn redact_sensitive(input: &str) -> String {
    let mut output = input.to_string();
    for pattern in [
        "appid=",
        "api_key=",
        "apikey=",
        "token=",
        "token:",
        "secret=",
        "secret:",
        "authorization:",
    ] {
        output = redact_after_pattern(&output, pattern);
    }
    output
}

fn redact_after_pattern(input: &str, pattern: &str) -> String {
    let lower = input.to_ascii_lowercase();
    let pattern_lower = pattern.to_ascii_lowercase();
    let mut output = String::with_capacity(input.len());
    let mut cursor = 0;

    while let Some(found) = lower[cursor..].find(&pattern_lower) {
        let start = cursor + found;
        let value_start = skip_whitespace(input, start + pattern.len());
        let value_end = find_value_end(input, value_start);

        output.push_str(&input[cursor..value_start]);
        if value_start < value_end {
            output.push_str("[REDACTED]");
        }
        cursor = value_end;
    }

    output.push_str(&input[cursor..]);
    output
}

fn skip_whitespace(input: &str, mut index: usize) -> usize {
    let bytes = input.as_bytes();
    while index < bytes.len() && bytes[index].is_ascii_whitespace() {
        index += 1;
    }
    index
}

fn find_value_end(input: &str, mut index: usize) -> usize {
    let bytes = input.as_bytes();
    while index < bytes.len() {
        let byte = bytes[index];
        if byte.is_ascii_whitespace() || matches!(byte, b'&' | b',' | b';' | b')' | b']' | b'}') {
            break;
        }
        index += 1;
    }
    index
}

fn escape_json_string(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            c if c < '\u{20}' => escaped.push_str(&format!("\\u{:04x}", c as u32)),
            c => escaped.push(c),
        }
    }
    escaped
}
