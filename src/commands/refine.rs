use std::env;
use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use clap::Args;
use owo_colors::OwoColorize;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::{self, OutputMode, ProfileConfig};
use crate::logging;
use crate::rchain::completions::{HttpChatBackend, TransportOptions};
use crate::rchain::provider::{ChatMessage, Provider, endpoint as default_endpoint, is_api_key_present};
use crate::refine::{
    DEFAULT_ALERT_ITERATIONS, DEFAULT_EVALUATOR_MODEL, DEFAULT_INITIAL_MODEL, DEFAULT_PANEL,
    DEFAULT_THRESHOLD, Prompts, RefineOutcome, RefineSettings, Refiner, ScoreParse,
};

#[derive(Debug, Args, Clone)]
pub struct RefineArgs {
    #[arg(help = "Question to answer; one line is read from stdin when omitted")]
    pub question: Option<String>,
    #[arg(long, help = "Named profile from the config file")]
    pub profile: Option<String>,
    #[arg(long, help = "openrouter, openai or fireworks")]
    pub provider: Option<String>,
    #[arg(long, help = "Override the chat-completions URL")]
    pub endpoint: Option<String>,
    #[arg(long, value_delimiter = ',', help = "Comma-separated panel model ids, in order")]
    pub panel: Option<Vec<String>>,
    #[arg(long, help = "Model that scores each response")]
    pub evaluator: Option<String>,
    #[arg(long, help = "Model that answers the raw question")]
    pub initial_model: Option<String>,
    #[arg(long, help = "Model that rewrites the final answer (defaults to the initial model)")]
    pub rephrase_model: Option<String>,
    #[arg(long, help = "Minimum score that ends refinement, 0 to 1")]
    pub threshold: Option<f64>,
    #[arg(long, help = "Warn once this many panel models have been consulted")]
    pub alert_iterations: Option<u32>,
    #[arg(long, help = "Per-request timeout in seconds")]
    pub timeout: Option<u64>,
    #[arg(long, help = "Attempts per request when it times out")]
    pub retries: Option<u32>,
    #[arg(long, help = "Pause between timed-out attempts in milliseconds")]
    pub retry_delay: Option<u64>,
    #[arg(long, help = "first-match or lenient")]
    pub score_parse: Option<String>,
    #[arg(long, help = "text or json")]
    pub output: Option<String>,
    #[arg(long, help = "Shorthand for --output json")]
    pub json: bool,
    #[arg(long, help = "Also write the JSON result to this file")]
    pub save: Option<PathBuf>,
    #[arg(long, help = "Print the resolved plan without calling any model")]
    pub dry_run: bool,
    #[arg(long, short = 'v')]
    pub verbose: bool,
    #[arg(long, short = 'q')]
    pub quiet: bool,
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub provider: Provider,
    pub endpoint: String,
    pub transport: TransportOptions,
    pub settings: RefineSettings,
    pub output: OutputMode,
}

struct Knob {
    flag: &'static str,
    env_key: &'static str,
    profile_key: &'static str,
}

const PROVIDER: Knob = Knob {
    flag: "--provider",
    env_key: "MR_PROVIDER",
    profile_key: "provider",
};
const SCORE_PARSE: Knob = Knob {
    flag: "--score-parse",
    env_key: "MR_SCORE_PARSE",
    profile_key: "score_parse",
};
const OUTPUT: Knob = Knob {
    flag: "--output",
    env_key: "MR_OUTPUT",
    profile_key: "output",
};

type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub async fn run(args: RefineArgs) -> Result<(), String> {
    logging::init_logging(args.verbose, args.quiet);

    let profile = match args.profile.as_deref() {
        Some(name) => Some(config::load_profile(name)?),
        None => None,
    };
    let plan = resolve_plan(&args, &|key: &str| env::var(key).ok(), profile.as_ref())?;
    let question = read_question(args.question.as_deref())?;

    debug!(
        provider = plan.provider.as_str(),
        endpoint = %plan.endpoint,
        api_key_present = is_api_key_present(plan.provider),
        panel = plan.settings.panel.len(),
        threshold = plan.settings.threshold,
        "resolved refine plan"
    );

    if args.dry_run {
        let body = dry_run_body(&plan, &question);
        if let Some(path) = &args.save {
            save_json(path, &body)?;
        }
        println!("{body}");
        return Ok(());
    }

    let backend = HttpChatBackend::from_env(plan.provider, plan.endpoint.clone(), plan.transport)
        .map_err(|err| err.to_string())?;

    let started = Instant::now();
    let outcome = Refiner::new(&backend, &plan.settings)
        .process_question(&question)
        .await
        .map_err(|err| err.to_string())?;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let body = outcome_body(&outcome, latency_ms);
    if let Some(path) = &args.save {
        save_json(path, &body)?;
    }

    match plan.output {
        OutputMode::Json => println!("{body}"),
        OutputMode::Text => print_text(&outcome),
    }
    Ok(())
}

pub fn resolve_plan(
    args: &RefineArgs,
    env: EnvLookup<'_>,
    profile: Option<&ProfileConfig>,
) -> Result<RunPlan, String> {
    let empty = ProfileConfig::default();
    let profile = profile.unwrap_or(&empty);

    let provider = resolve_named(
        &PROVIDER,
        args.provider.as_deref(),
        env,
        profile.provider.as_deref(),
        Provider::from_name,
        Provider::SUPPORTED,
    )?
    .unwrap_or(Provider::Openrouter);

    let endpoint = args
        .endpoint
        .clone()
        .or_else(|| env_string(env, "MR_ENDPOINT"))
        .or_else(|| profile.endpoint.clone())
        .unwrap_or_else(|| default_endpoint(provider).to_string());

    let panel = match &args.panel {
        Some(models) => checked_panel("--panel", models.clone())?,
        None => match env_string(env, "MR_PANEL") {
            Some(raw) => checked_panel(
                "MR_PANEL",
                raw.split(',').map(str::to_string).collect(),
            )?,
            None => match &profile.panel {
                Some(models) => checked_panel("profile panel", models.clone())?,
                None => DEFAULT_PANEL.iter().map(|model| model.to_string()).collect(),
            },
        },
    };

    let initial_model = args
        .initial_model
        .clone()
        .or_else(|| env_string(env, "MR_INITIAL_MODEL"))
        .or_else(|| profile.initial_model.clone())
        .unwrap_or_else(|| DEFAULT_INITIAL_MODEL.to_string());
    let evaluator_model = args
        .evaluator
        .clone()
        .or_else(|| env_string(env, "MR_EVALUATOR"))
        .or_else(|| profile.evaluator.clone())
        .unwrap_or_else(|| DEFAULT_EVALUATOR_MODEL.to_string());
    let rephrase_model = args
        .rephrase_model
        .clone()
        .or_else(|| env_string(env, "MR_REPHRASE_MODEL"))
        .or_else(|| profile.rephrase_model.clone())
        .unwrap_or_else(|| initial_model.clone());

    let threshold = layer(
        args.threshold,
        env_parse(env, "MR_THRESHOLD")?,
        profile.threshold,
        DEFAULT_THRESHOLD,
    );
    let threshold =
        config::check_threshold(threshold).map_err(|err| format!("Invalid threshold: {err}"))?;

    let alert_iterations = layer(
        args.alert_iterations,
        env_parse(env, "MR_ALERT_ITERATIONS")?,
        profile.alert_iterations,
        DEFAULT_ALERT_ITERATIONS,
    );

    let defaults = TransportOptions::default();
    let transport = TransportOptions {
        timeout_secs: layer(
            args.timeout,
            env_parse(env, "MR_TIMEOUT")?,
            profile.timeout,
            defaults.timeout_secs,
        ),
        retries: layer(
            args.retries,
            env_parse(env, "MR_RETRIES")?,
            profile.retries,
            defaults.retries,
        ),
        retry_delay_ms: layer(
            args.retry_delay,
            env_parse(env, "MR_RETRY_DELAY")?,
            profile.retry_delay,
            defaults.retry_delay_ms,
        ),
    };

    let score_parse = resolve_named(
        &SCORE_PARSE,
        args.score_parse.as_deref(),
        env,
        profile.score_parse.as_deref(),
        ScoreParse::from_name,
        ScoreParse::SUPPORTED,
    )?
    .unwrap_or_default();

    let output = if args.json {
        OutputMode::Json
    } else {
        resolve_named(
            &OUTPUT,
            args.output.as_deref(),
            env,
            profile.output.as_deref(),
            OutputMode::from_name,
            "text, json",
        )?
        .unwrap_or_default()
    };

    let defaults = Prompts::default();
    let prompts = Prompts {
        improve_instruction: profile
            .improve_instruction
            .clone()
            .unwrap_or(defaults.improve_instruction),
        evaluate: profile.evaluate_prompt.clone().unwrap_or(defaults.evaluate),
        rephrase: profile.rephrase_prompt.clone().unwrap_or(defaults.rephrase),
    };

    Ok(RunPlan {
        provider,
        endpoint,
        transport,
        settings: RefineSettings {
            initial_model,
            evaluator_model,
            rephrase_model,
            panel,
            threshold,
            alert_iterations,
            score_parse,
            prompts,
        },
        output,
    })
}

fn layer<T>(cli: Option<T>, env: Option<T>, profile: Option<T>, default: T) -> T {
    cli.or(env).or(profile).unwrap_or(default)
}

fn env_string(env: EnvLookup<'_>, key: &str) -> Option<String> {
    env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(env: EnvLookup<'_>, key: &str) -> Result<Option<T>, String> {
    match env_string(env, key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| format!("Invalid {key} '{raw}'.")),
        None => Ok(None),
    }
}

fn resolve_named<T>(
    knob: &Knob,
    cli: Option<&str>,
    env: EnvLookup<'_>,
    profile: Option<&str>,
    parse: fn(&str) -> Option<T>,
    supported: &str,
) -> Result<Option<T>, String> {
    let (source, raw) = if let Some(raw) = cli {
        (knob.flag.to_string(), raw.to_string())
    } else if let Some(raw) = env_string(env, knob.env_key) {
        (knob.env_key.to_string(), raw)
    } else if let Some(raw) = profile {
        (format!("profile {}", knob.profile_key), raw.to_string())
    } else {
        return Ok(None);
    };

    parse(&raw)
        .map(Some)
        .ok_or_else(|| format!("Invalid {source} '{raw}'. Supported values: {supported}."))
}

fn checked_panel(source: &str, models: Vec<String>) -> Result<Vec<String>, String> {
    let models: Vec<String> = models
        .into_iter()
        .map(|model| model.trim().to_string())
        .collect();
    if models.iter().any(String::is_empty) {
        return Err(format!("Invalid {source}: model ids must not be empty."));
    }
    Ok(models)
}

fn read_question(argument: Option<&str>) -> Result<String, String> {
    if let Some(question) = argument.map(str::trim).filter(|text| !text.is_empty()) {
        return Ok(question.to_string());
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        eprint!("Enter your question: ");
        let _ = io::stderr().flush();
    }

    let mut line = String::new();
    stdin
        .lock()
        .read_line(&mut line)
        .map_err(|err| format!("Failed to read question from stdin: {err}"))?;

    let question = line.trim();
    if question.is_empty() {
        return Err("No question provided. Pass it as an argument or on stdin.".to_string());
    }
    Ok(question.to_string())
}

fn dry_run_body(plan: &RunPlan, question: &str) -> Value {
    json!({
        "dry_run": true,
        "provider": plan.provider.as_str(),
        "endpoint": plan.endpoint,
        "output": plan.output.as_str(),
        "initial_model": plan.settings.initial_model,
        "evaluator_model": plan.settings.evaluator_model,
        "rephrase_model": plan.settings.rephrase_model,
        "panel": plan.settings.panel,
        "threshold": plan.settings.threshold,
        "alert_iterations": plan.settings.alert_iterations,
        "score_parse": plan.settings.score_parse.as_str(),
        "request": {
            "timeout_secs": plan.transport.timeout_secs,
            "retries": plan.transport.retries,
            "retry_delay_ms": plan.transport.retry_delay_ms,
        },
        "messages": [ChatMessage::user(question)],
    })
}

fn outcome_body(outcome: &RefineOutcome, latency_ms: u64) -> Value {
    json!({
        "response": outcome.response,
        "improvement_count": outcome.improvement_count,
        "threshold_met": outcome.threshold_met,
        "initial_score": outcome.initial_score,
        "rounds": outcome.rounds,
        "latency_ms": latency_ms,
    })
}

fn print_text(outcome: &RefineOutcome) {
    println!("{}", outcome.response);
    println!();
    if io::stdout().is_terminal() {
        println!("{} {}", "Improvements:".bold(), outcome.improvement_count);
    } else {
        println!("Improvements: {}", outcome.improvement_count);
    }
}

fn save_json(path: &Path, body: &Value) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create output directory '{}': {err}",
                parent.display()
            )
        })?;
    }

    fs::write(path, body.to_string())
        .map_err(|err| format!("Failed to write output file '{}': {err}", path.display()))
}
