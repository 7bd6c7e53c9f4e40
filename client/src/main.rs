//! A command line tool for judging hackathon submissions.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::too_many_lines)]

extern crate judgebot_common;
use judgebot_common::ai_judge::{AiRatings, OpenAiClient};
use judgebot_common::batch::{BatchOptions, read_submission_list, run_batch};
use judgebot_common::config::{DEFAULT_CONFIG_PATH, Settings};
use judgebot_common::pipeline::{RatingPlan, judge_submission, rate_submission};
use judgebot_common::ratings::{FixedRatings, RandomRatings, RatingStrategy};
use judgebot_common::session::{REQUIRED_COOKIES, SessionContext};
use judgebot_common::site_api::{ParsedProject, SiteClient};
use judgebot_common::transport::ReqwestTransport;
use judgebot_common::{CLIENT_VERSION, JudgeError, write_json};

extern crate serde_json;
use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The JSON config file holding the session and AI settings
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH, env = "JUDGEBOT_CONFIG")]
    config: PathBuf,

    /// API key for the language model, overriding the config file
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Suppress all output
    #[arg(short, long, global = true, env = "JUDGEBOT_QUIET")]
    quiet: bool,

    /// Show additional output
    #[arg(short, long, global = true, env = "JUDGEBOT_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the config file from a "Copy as cURL" capture of a logged-in request
    Setup {
        /// File containing the curl command
        #[arg(short, long, default_value = "curl.txt")]
        file: PathBuf,
        /// Type the user agent, cookies and base URL in by hand instead
        #[arg(short, long)]
        manual: bool,
    },
    /// Parse every project in a list file and save the data as JSON
    Parse {
        /// File with one submission path per line
        #[arg(short, long, default_value = "uri.txt")]
        file: PathBuf,
        /// Output JSON file
        #[arg(short, long, default_value = "project_data.json")]
        output: PathBuf,
    },
    /// Fetch one project's details without submitting
    Fetch {
        /// Submission path, e.g. /submissions/123-name/judging
        path: String,
        /// Output JSON file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Submit ratings for one project
    Submit {
        /// Submission path, e.g. /submissions/123-name/judging
        path: String,
        #[command(flatten)]
        strategy: StrategyArgs,
    },
    /// Generate AI ratings for one project without submitting
    Ai {
        /// Submission path, e.g. /submissions/123-name/judging
        path: String,
        /// Output JSON file for the ratings
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Log the prompt and the model's reply
        #[arg(short, long)]
        test_mode: bool,
    },
    /// Submit ratings for every project in a list file
    Batch {
        /// File with one submission path per line
        #[arg(short, long, default_value = "uri.txt", env = "JUDGEBOT_LIST")]
        file: PathBuf,
        /// Process at most this many projects
        #[arg(short = 'n', long)]
        count: Option<usize>,
        /// Seconds to wait between submissions
        #[arg(short, long, default_value_t = 2, env = "JUDGEBOT_DELAY")]
        delay: u64,
        /// Results JSON, rewritten after every submission
        #[arg(short, long, default_value = "submission_results.json")]
        output: PathBuf,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        #[command(flatten)]
        strategy: StrategyArgs,
    },
}

#[derive(Args, Debug)]
struct StrategyArgs {
    /// Apply this rating to every criterion
    #[arg(short, long, conflicts_with_all = ["auto", "ai"])]
    rating: Option<u8>,

    /// Use random ratings from the configured range (the default)
    #[arg(short, long, conflicts_with = "ai")]
    auto: bool,

    /// Use AI-generated ratings based on the project write-up
    #[arg(long)]
    ai: bool,

    /// Seed for random ratings
    #[arg(long)]
    seed: Option<u64>,

    /// Fall back to random ratings if AI rating fails
    #[arg(long, requires = "ai")]
    fallback_random: bool,

    /// Log the AI prompt and the model's reply
    #[arg(short, long)]
    test_mode: bool,
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
}

fn build_site(settings: &Settings) -> Result<SiteClient> {
    let session = settings.session();
    let missing = session.missing_cookies(&REQUIRED_COOKIES);
    if !missing.is_empty() {
        warn!("Session is missing cookies {missing:?}; authentication may fail. Run `setup`.");
    }
    let transport = ReqwestTransport::new(settings.request_timeout(), settings.max_retries)?;
    Ok(SiteClient::new(
        session,
        Box::new(transport),
        settings.auth_signature.clone(),
    ))
}

fn ai_ratings(cli: &Cli, settings: &Settings, test_mode: bool) -> Result<AiRatings> {
    let api_key = settings
        .resolved_api_key(cli.openai_api_key.clone())
        .ok_or_else(|| {
            anyhow!("no OpenAI API key: set OPENAI_API_KEY or openai_api_key in the config file")
        })?;
    let client = OpenAiClient::new(
        &api_key,
        &settings.openai_model,
        &settings.openai_base_url,
        settings.request_timeout(),
    )?;
    Ok(AiRatings::new(
        Box::new(client),
        settings.criteria.clone(),
        settings.score_range,
        test_mode,
    ))
}

fn build_plan(cli: &Cli, settings: &Settings, args: &StrategyArgs) -> Result<RatingPlan> {
    let random = || RandomRatings::new(settings.random_range, settings.score_range, args.seed);
    let plan = if let Some(rating) = args.rating {
        RatingPlan::new(RatingStrategy::Fixed(FixedRatings::new(
            rating,
            settings.score_range,
        )?))
    } else if args.ai {
        let plan = RatingPlan::new(RatingStrategy::Ai(ai_ratings(cli, settings, args.test_mode)?));
        if args.fallback_random {
            plan.with_fallback(random()?)
        } else {
            plan
        }
    } else {
        RatingPlan::new(RatingStrategy::Random(random()?))
    };
    Ok(plan)
}

/// Print `question` and read one trimmed line. End of input reads as an empty answer.
fn ask<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<String> {
    write!(output, "{question}")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(answer.trim().to_string())
}

fn confirm(question: &str) -> Result<bool> {
    let answer = ask(
        &mut io::stdin().lock(),
        &mut io::stdout(),
        &format!("{question} (y/n): "),
    )?;
    Ok(answer.eq_ignore_ascii_case("y"))
}

/// A session typed in by hand, plus the optional API key asked for alongside it.
struct ManualEntry {
    session: SessionContext,
    openai_api_key: Option<String>,
}

fn prompt_session<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    current: &Settings,
) -> Result<ManualEntry> {
    let mut headers = current.headers.clone();
    let user_agent = ask(input, output, "User-Agent (press Enter for default): ")?;
    if !user_agent.is_empty() {
        headers.insert("user-agent".to_string(), user_agent);
    }

    writeln!(
        output,
        "Enter cookies (required for authentication). Leave the name blank when done."
    )?;
    let mut cookies = BTreeMap::new();
    loop {
        let name = ask(input, output, "Cookie name (e.g., jwt): ")?;
        if name.is_empty() {
            break;
        }
        let value = ask(input, output, &format!("Value for {name}: "))?;
        cookies.insert(name, value);
    }

    let base_url = ask(
        input,
        output,
        &format!("Base URL (default: {}): ", current.base_url),
    )?;
    let base_url = if base_url.is_empty() {
        current.base_url.clone()
    } else {
        base_url
    };

    let api_key = ask(
        input,
        output,
        "OpenAI API key (for AI ratings, leave blank if not using): ",
    )?;

    Ok(ManualEntry {
        session: SessionContext::new(&base_url, headers, cookies),
        openai_api_key: Some(api_key).filter(|k| !k.is_empty()),
    })
}

fn session_from_curl_file(curl_file: &Path) -> Result<SessionContext> {
    let curl_command = fs::read_to_string(curl_file).with_context(|| {
        format!(
            "could not read {}. Log in to the site, open developer tools, right-click a request, \
             choose \"Copy as cURL\" and paste it into that file",
            curl_file.display()
        )
    })?;
    if curl_command.trim().is_empty() {
        bail!("{} is empty", curl_file.display());
    }
    Ok(SessionContext::from_curl(&curl_command)?)
}

fn setup(cli: &Cli, curl_file: &Path, manual: bool) -> Result<()> {
    let current = Settings::load(&cli.config)?;
    let manual_entry =
        |current: &Settings| prompt_session(&mut io::stdin().lock(), &mut io::stdout(), current);

    let entry = if manual {
        manual_entry(&current)?
    } else {
        match session_from_curl_file(curl_file) {
            Ok(session) => ManualEntry {
                session,
                openai_api_key: None,
            },
            Err(e) => {
                warn!("Failed to extract the session from the curl command: {e:#}");
                if !confirm("Enter the session manually instead?")? {
                    return Err(e);
                }
                manual_entry(&current)?
            }
        }
    };

    let session = entry.session;
    let mut settings = current.with_session(&session);
    if entry.openai_api_key.is_some() {
        settings.openai_api_key = entry.openai_api_key;
    }
    settings.save(&cli.config)?;

    if !cli.quiet {
        println!(
            "Saved {} with {} headers and {} cookies for {}",
            cli.config.display(),
            session.headers().len(),
            session.cookies().len(),
            session.base_url()
        );
    }
    let missing = session.missing_cookies(&REQUIRED_COOKIES);
    if missing.is_empty() {
        if !cli.quiet {
            println!("All important cookies are present!");
        }
    } else {
        warn!("Some important cookies are missing: {missing:?}. Authentication may not work.");
    }
    Ok(())
}

fn parse_list(cli: &Cli, settings: &Settings, file: &Path, output: &Path) -> Result<()> {
    let site = build_site(settings)?;
    let paths = read_submission_list(file)?;
    let mut projects: BTreeMap<String, ParsedProject> = BTreeMap::new();

    for path in &paths {
        match site.fetch_project(path) {
            Ok(project) => {
                projects.insert(path.clone(), project);
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!("Skipping {path}: {e}"),
        }
    }

    write_json(output, &projects)?;
    if !cli.quiet {
        println!(
            "Processed {} of {} projects. Results saved to {}",
            projects.len(),
            paths.len(),
            output.display()
        );
    }
    Ok(())
}

fn fetch(cli: &Cli, settings: &Settings, path: &str, output: Option<&Path>) -> Result<()> {
    let site = build_site(settings)?;
    let project = site.fetch_project(path)?;

    if !cli.quiet {
        println!("Fetched project: {}", project.page.title);
        if cli.verbose {
            println!("{}", serde_json::to_string_pretty(&project)?);
        }
    }
    if let Some(output) = output {
        write_json(output, &project)?;
        if !cli.quiet {
            println!("Project data saved to {}", output.display());
        }
    }
    Ok(())
}

fn submit(cli: &Cli, settings: &Settings, path: &str, args: &StrategyArgs) -> Result<()> {
    let site = build_site(settings)?;
    let mut plan = build_plan(cli, settings, args)?;
    if !cli.quiet {
        println!("Submitting {path} with {}", plan.strategy.describe());
    }

    let result = judge_submission(&site, &mut plan, path)?;
    if !cli.quiet {
        println!(
            "Submitted ratings for {} (status {}): {}",
            result.project_title,
            result.status_code,
            serde_json::to_string(&result.ratings_used)?
        );
    }
    Ok(())
}

fn generate_ai(
    cli: &Cli,
    settings: &Settings,
    path: &str,
    output: Option<&Path>,
    test_mode: bool,
) -> Result<()> {
    let site = build_site(settings)?;
    let mut plan = RatingPlan::new(RatingStrategy::Ai(ai_ratings(cli, settings, test_mode)?));
    let (project, ratings) = rate_submission(&site, &mut plan, path)?;

    if let Some(output) = output {
        write_json(output, &ratings)?;
        if !cli.quiet {
            println!("AI ratings saved to {}", output.display());
        }
    } else {
        println!("{}", serde_json::to_string_pretty(&ratings)?);
    }
    if !cli.quiet {
        for (name, score) in ratings.in_form_order(&project.form) {
            println!("  {name}: {score}");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn batch(
    cli: &Cli,
    settings: &Settings,
    file: &Path,
    count: Option<usize>,
    delay: u64,
    output: &Path,
    yes: bool,
    args: &StrategyArgs,
) -> Result<()> {
    let paths = read_submission_list(file)?;
    let total = count.map_or(paths.len(), |c| c.min(paths.len()));
    let site = build_site(settings)?;
    let mut plan = build_plan(cli, settings, args)?;

    if !cli.quiet {
        println!(
            "Preparing to submit forms for {total} projects with {}",
            plan.strategy.describe()
        );
    }
    if !yes && !confirm("Continue?")? {
        println!("Aborted.");
        return Ok(());
    }

    let options = BatchOptions {
        limit: count,
        delay: Duration::from_secs(delay),
        results_path: Some(output.to_path_buf()),
    };
    let report = run_batch(&paths, &options, |path| {
        judge_submission(&site, &mut plan, path)
    });

    for item in report.items.iter().filter(|i| !i.succeeded()) {
        if let Some(error) = &item.error {
            eprintln!("{} {}: {}", error.kind, item.path, error.message);
        }
    }
    if !cli.quiet {
        println!("{}", report.summary());
        println!("Results saved to {}", output.display());
    }
    if report.halted.is_some() {
        bail!("batch halted: the session has expired, run `setup` again");
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    if let Command::Setup { file, manual } = &cli.command {
        return setup(cli, file, *manual);
    }

    let settings = Settings::load(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;
    if cli.verbose {
        println!("Judgebot v{CLIENT_VERSION} using {}", settings.base_url);
    }

    match &cli.command {
        Command::Setup { .. } => Ok(()),
        Command::Parse { file, output } => parse_list(cli, &settings, file, output),
        Command::Fetch { path, output } => fetch(cli, &settings, path, output.as_deref()),
        Command::Submit { path, strategy } => submit(cli, &settings, path, strategy),
        Command::Ai {
            path,
            output,
            test_mode,
        } => generate_ai(cli, &settings, path, output.as_deref(), *test_mode),
        Command::Batch {
            file,
            count,
            delay,
            output,
            yes,
            strategy,
        } => batch(cli, &settings, file, *count, *delay, output, *yes, strategy),
    }
}

fn main() {
    // Parse command line arguments
    let cli = Cli::parse();

    // Set up logger
    init_logging(&cli);

    if let Err(e) = run(&cli) {
        match e.downcast_ref::<JudgeError>() {
            Some(judge_error) => eprintln!("{}: {e:#}", judge_error.kind()),
            None => eprintln!("Error: {e:#}"),
        }
        std::process::exit(1);
    }
}
