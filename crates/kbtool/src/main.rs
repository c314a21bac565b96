use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use kbtool_core::config::{DEFAULT_EXPORT_DIR, KbConfig, load_config};
use kbtool_core::content::{DEFAULT_PAGE_TEMPLATE, extract_content};
use kbtool_core::dumper::{DumpOptions, DumpReport, dump_spaces};
use kbtool_core::http::HttpClient;
use kbtool_core::links::{find_links_in_html, load_links};
use kbtool_core::mapping::{load_mapping, save_mapping};
use kbtool_core::pipeline::{SpaceOutcome, SpacePlan, run_spaces};
use kbtool_core::reconcile::{ReconciliationReport, reconcile};
use kbtool_core::record::write_json;
use kbtool_core::resolver::resolve_page_ids;
use kbtool_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "kbtool",
    version,
    about = "Scrape knowledge-base link dumps, resolve page ids and clean exported pages"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create .kbtool/ and a default config")]
    Init(InitArgs),
    #[command(about = "Extract page links of a space from its raw HTML dump")]
    Links(LinksArgs),
    #[command(about = "Fetch every linked page and record its page id")]
    Resolve(ResolveArgs),
    #[command(about = "Reconcile an export folder against a saved mapping")]
    Clean(CleanArgs),
    #[command(about = "Links, resolve and clean for one or more spaces")]
    Run(RunArgs),
    #[command(about = "Flatten one HTML page into an export record")]
    Extract(ExtractArgs),
    #[command(about = "Dump Confluence spaces into per-page export records")]
    Dump(DumpArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config")]
    force: bool,
}

#[derive(Debug, Args)]
struct LinksArgs {
    #[arg(long, value_name = "KEY")]
    space: String,
    #[arg(long, value_name = "PATH", help = "Raw HTML dump (default: from config)")]
    html_file: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Link file to write")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ResolveArgs {
    #[arg(long, value_name = "KEY")]
    space: String,
    #[arg(long, value_name = "PATH", help = "Link file to read")]
    links: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "Mapping file to write")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct CleanArgs {
    #[arg(long, value_name = "KEY")]
    space: String,
    #[arg(long, value_name = "PATH", help = "Mapping file to read")]
    mapping: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Export folder to read")]
    input: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Cleaned folder to recreate")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long = "space", value_name = "KEY", help = "Space to process (repeatable, default: all configured)")]
    spaces: Vec<String>,
    #[arg(long, help = "Continue with the next space when one fails")]
    keep_going: bool,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    html_file: PathBuf,
    #[arg(long, help = "Url recorded in the output")]
    url: String,
    #[arg(long, value_name = "PATH", help = "Write the record here instead of stdout")]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct DumpArgs {
    #[arg(long = "space", value_name = "KEY", help = "Space to dump (repeatable, default: config or all)")]
    spaces: Vec<String>,
    #[arg(long, value_name = "DIR", help = "Export folder to recreate")]
    export_dir: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "HTML template for rendered pages")]
    template: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Links(args)) => run_links(&runtime, args),
        Some(Commands::Resolve(args)) => run_resolve(&runtime, args),
        Some(Commands::Clean(args)) => run_clean(&runtime, args),
        Some(Commands::Run(args)) => run_pipeline(&runtime, args),
        Some(Commands::Extract(args)) => run_extract(args),
        Some(Commands::Dump(args)) => run_dump(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let paths = resolve_runtime_paths(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized kbtool project layout");
    println!("project_root: {}", normalize_for_display(&paths.project_root));
    println!("state_dir: {}", normalize_for_display(&paths.state_dir));
    println!("config_path: {}", normalize_for_display(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_links(runtime: &RuntimeOptions, args: LinksArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let plan = space_plan(&paths, &config, &args.space);
    let html_file = override_or(&paths, args.html_file, plan.html_file);
    let output = override_or(&paths, args.output, plan.links_file);

    let links = find_links_in_html(&html_file, &config.base_url(), &plan.url_subdir, &output)?;

    println!("space: {}", plan.key);
    println!("html_file: {}", normalize_for_display(&html_file));
    println!("links_file: {}", normalize_for_display(&output));
    println!("links: {}", links.len());
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_resolve(runtime: &RuntimeOptions, args: ResolveArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let plan = space_plan(&paths, &config, &args.space);
    let links_file = override_or(&paths, args.links, plan.links_file);
    let output = override_or(&paths, args.output, plan.mapping_file);

    let links = load_links(&links_file)?;
    let client = HttpClient::new(&config.http_options()?)?;
    let mapping = resolve_page_ids(&client, &links)?;
    save_mapping(&output, &mapping)?;

    println!("space: {}", plan.key);
    println!("links: {}", links.len());
    println!("page_ids: {}", mapping.len());
    println!("mapping_file: {}", normalize_for_display(&output));
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_clean(runtime: &RuntimeOptions, args: CleanArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let plan = space_plan(&paths, &config, &args.space);
    let mapping_file = override_or(&paths, args.mapping, plan.mapping_file);
    let input = override_or(&paths, args.input, plan.export_dir);
    let output = override_or(&paths, args.output, plan.cleaned_dir);

    let mapping = load_mapping(&mapping_file)?;
    let report = reconcile(&input, &output, &mapping)?;

    println!("space: {}", plan.key);
    println!("input: {}", normalize_for_display(&input));
    println!("output: {}", normalize_for_display(&output));
    print_reconciliation(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn run_pipeline(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let plans: Vec<SpacePlan> = if args.spaces.is_empty() {
        config
            .spaces()
            .iter()
            .map(|space| SpacePlan::new(&paths, &config, space))
            .collect()
    } else {
        args.spaces
            .iter()
            .map(|key| space_plan(&paths, &config, key))
            .collect()
    };

    let client = HttpClient::new(&config.http_options()?)?;
    let report = run_spaces(&client, &config.base_url(), &plans, args.keep_going)?;

    for outcome in &report.outcomes {
        print_outcome(outcome);
    }
    print_diagnostics(runtime, &paths);
    if !report.failed.is_empty() {
        bail!(
            "{} of {} spaces failed: {}",
            report.failed.len(),
            plans.len(),
            report.failed.join(", ")
        );
    }
    Ok(())
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let html = fs::read_to_string(&args.html_file)
        .with_context(|| format!("failed to read {}", args.html_file.display()))?;
    let record = extract_content(&html, &args.url);
    match args.output {
        Some(output) => {
            write_json(&output, &record)?;
            println!("title: {}", record.title);
            println!("paragraphs: {}", record.paragraphs.len());
            println!("output: {}", normalize_for_display(&output));
        }
        None => println!("{}", serde_json::to_string_pretty(&record)?),
    }
    Ok(())
}

fn run_dump(runtime: &RuntimeOptions, args: DumpArgs) -> Result<()> {
    let (paths, config) = load_runtime(runtime)?;
    let template = match args
        .template
        .or_else(|| config.confluence.template.clone())
    {
        Some(path) => {
            let path = paths.resolve(&path);
            fs::read_to_string(&path)
                .with_context(|| format!("failed to read template {}", path.display()))?
        }
        None => DEFAULT_PAGE_TEMPLATE.to_string(),
    };
    let export_dir = args
        .export_dir
        .or_else(|| config.paths.export_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EXPORT_DIR));
    let spaces = if args.spaces.is_empty() {
        config.confluence.spaces.clone()
    } else {
        args.spaces
    };

    let options = DumpOptions {
        api_base: config.confluence_url(),
        web_url_pattern: config.web_url_pattern(),
        export_dir: paths.resolve(&export_dir),
        template,
        spaces,
    };
    let client = HttpClient::new(&config.http_options()?)?;
    let report = dump_spaces(&client, &options)?;

    println!("export_dir: {}", normalize_for_display(&options.export_dir));
    print_dump(&report);
    print_diagnostics(runtime, &paths);
    Ok(())
}

fn print_outcome(outcome: &SpaceOutcome) {
    println!("[{}]", outcome.key);
    println!("links: {}", outcome.links);
    println!("page_ids: {}", outcome.page_ids);
    print_reconciliation(&outcome.report);
    println!();
}

fn print_reconciliation(report: &ReconciliationReport) {
    println!("succeeded: {}", report.succeeded.len());
    println!("failed: {}", report.failed.len());
    println!("forwarded: {}", report.forwarded);
    println!("skipped: {}", report.skipped.len());
    println!(
        "success_ratio: {}",
        report
            .success_ratio()
            .map(|ratio| format!("{ratio:.3}"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    print_list("sample_succeeded", report.sample_succeeded());
    print_list("sample_failed", report.sample_failed());
}

fn print_dump(report: &DumpReport) {
    println!("spaces: {}", report.spaces.join(", "));
    println!("pages: {}", report.pages);
    println!("attachments: {}", report.attachments);
    print_list("failed_spaces", &report.failed_spaces);
    print_list("failed_pages", &report.failed_pages);
}

fn print_list(label: &str, values: &[String]) {
    if values.is_empty() {
        println!("{label}: none");
        return;
    }
    println!("{label}:");
    for value in values {
        println!("  - {value}");
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, paths: &ResolvedPaths) {
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
}

fn space_plan(paths: &ResolvedPaths, config: &KbConfig, key: &str) -> SpacePlan {
    SpacePlan::new(paths, config, &config.space(key))
}

fn override_or(paths: &ResolvedPaths, flag: Option<PathBuf>, default: PathBuf) -> PathBuf {
    match flag {
        Some(path) => paths.resolve(&path),
        None => default,
    }
}

fn load_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, KbConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let project_env = initial.project_root.join(".env");
    if project_env.exists() {
        let _ = dotenvy::from_path_override(&project_env);
    }

    resolve_paths(&context, &overrides)
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
