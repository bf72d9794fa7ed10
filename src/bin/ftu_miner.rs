use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde::Serialize;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use ftu_miner::annotate::{self, AnnotationJob, JobOptions};
use ftu_miner::app::{LogSink, ProgressSink, TagApp};
use ftu_miner::batch::BatchOptions;
use ftu_miner::benchmark::{self, BenchmarkTable, Scorer};
use ftu_miner::classify::Classifier;
use ftu_miner::clickhouse::ClickHouseHttpStore;
use ftu_miner::config::{ConfigLoader, ResolvedConfig};
use ftu_miner::domain::{Labels, TagDomain};
use ftu_miner::error::MinerError;
use ftu_miner::finalize::finalize;
use ftu_miner::llm::{GatewayChatClient, OllamaChatClient};
use ftu_miner::nxml::extract_dir;
use ftu_miner::ontology::{SynonymIndex, evaluate, write_evaluation};
use ftu_miner::output::{JsonOutput, OutputMode};
use ftu_miner::providers::bioportal::{BioportalHttpClient, describe_csv};
use ftu_miner::providers::{HttpDownloader, ols, pmc};
use ftu_miner::rounds::{self, RoundFile};
use ftu_miner::scale_bar;
use ftu_miner::scoring::jaccard_lists;
use ftu_miner::sheet::read_table;
use ftu_miner::store::Store;

#[derive(Parser)]
#[command(name = "ftu-miner")]
#[command(about = "FTU literature mining: fetch, extract, tag and benchmark")]
#[command(version, author)]
struct Cli {
    /// Config file (default: ./ftu-miner.json)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "LLM tagging of donor metadata with round-based convergence")]
    Tag(TagArgs),
    #[command(about = "Score model output against ground truth")]
    Eval(EvalArgs),
    #[command(about = "Model comparison harness on ClickHouse")]
    Bench(BenchArgs),
    #[command(about = "Extract records from downloaded articles")]
    Extract(ExtractArgs),
    #[command(about = "Fetch ontology and PMC source data")]
    Fetch(FetchArgs),
}

#[derive(Args)]
struct TagArgs {
    #[command(subcommand)]
    command: TagCommand,
}

#[derive(Args, Clone, Copy)]
struct DomainArg {
    #[arg(long, value_enum)]
    domain: TagDomain,
}

#[derive(Subcommand)]
enum TagCommand {
    #[command(about = "Seed round 0 from the master list")]
    Init {
        #[command(flatten)]
        domain: DomainArg,
        /// Master CSV (default: donor-meta/<domain>/<domain>.csv)
        #[arg(long)]
        master: Option<Utf8PathBuf>,
        #[arg(long)]
        force: bool,
    },
    #[command(about = "Classify the remaining items of the current round")]
    Classify {
        #[command(flatten)]
        domain: DomainArg,
        #[arg(long)]
        workers: Option<usize>,
    },
    #[command(about = "Merge the current round's batch files")]
    Merge {
        #[command(flatten)]
        domain: DomainArg,
    },
    #[command(about = "Compare with the previous round and prepare the next one")]
    Advance {
        #[command(flatten)]
        domain: DomainArg,
    },
    #[command(about = "Classify, merge and advance until the rounds converge")]
    Run {
        #[command(flatten)]
        domain: DomainArg,
        #[arg(long)]
        workers: Option<usize>,
    },
    #[command(about = "Show the current round")]
    Status {
        #[command(flatten)]
        domain: DomainArg,
    },
    #[command(about = "Merge agreed rows and tag the master list")]
    Finalize {
        #[command(flatten)]
        domain: DomainArg,
        #[arg(long)]
        master: Option<Utf8PathBuf>,
    },
}

#[derive(Args)]
struct EvalArgs {
    #[command(subcommand)]
    command: EvalCommand,
}

#[derive(Subcommand)]
enum EvalCommand {
    #[command(about = "Ontology-ID precision/recall/F1 per model")]
    Ontology {
        /// Synonym CSV (class id, preferred label, synonyms)
        #[arg(long)]
        synonyms: PathBuf,
        /// Predictions CSV or XLSX
        #[arg(long)]
        predictions: PathBuf,
        #[arg(long, default_value = "answer")]
        gt_column: String,
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,
        /// Detailed output CSV; the summary lands next to it
        #[arg(long)]
        out: PathBuf,
    },
    #[command(about = "Jaccard similarity of two JSON lists")]
    Jaccard { left: String, right: String },
    #[command(about = "Per-key scale-bar similarity of model responses")]
    ScaleBar {
        /// Annotated sample with `caption` and `Answer` columns
        #[arg(long)]
        sample: PathBuf,
        /// Directory holding one <model>.xlsx per model
        #[arg(long)]
        responses_dir: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,
        #[arg(long)]
        out_dir: PathBuf,
    },
}

#[derive(Args)]
struct BenchArgs {
    #[command(subcommand)]
    command: BenchCommand,
}

#[derive(Args)]
struct BenchTableArg {
    #[arg(long)]
    table: String,
    /// Model columns (default: every configured model)
    #[arg(long, value_delimiter = ',')]
    models: Vec<String>,
}

#[derive(Subcommand)]
enum BenchCommand {
    #[command(about = "Load answers x prompts into a benchmark table")]
    Import {
        #[command(flatten)]
        table: BenchTableArg,
        #[arg(long)]
        answers: PathBuf,
        #[arg(long)]
        prompts: PathBuf,
    },
    #[command(about = "Ask every model to answer its pending rows")]
    Query {
        #[command(flatten)]
        table: BenchTableArg,
        #[arg(long)]
        attempts: Option<usize>,
    },
    #[command(about = "Score stored model outputs")]
    Score {
        #[command(flatten)]
        table: BenchTableArg,
        #[arg(long, value_enum, default_value = "entities")]
        scorer: Scorer,
        #[arg(long, default_value_t = 8)]
        workers: usize,
    },
    #[command(about = "Import figure texts and ask the gateway for structured answers")]
    Annotate {
        #[arg(long, value_enum)]
        job: AnnotationJob,
        /// System prompt sent with every request
        #[arg(long)]
        prompt_file: PathBuf,
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = annotate::DEFAULT_ATTEMPTS)]
        attempts: usize,
        /// Answer already imported rows only
        #[arg(long)]
        no_import: bool,
    },
    #[command(about = "Rebuild the detail table from stored answers")]
    Expand {
        #[arg(long, value_enum)]
        job: AnnotationJob,
    },
}

#[derive(Args)]
struct ExtractArgs {
    #[command(subcommand)]
    command: ExtractCommand,
}

#[derive(Subcommand)]
enum ExtractCommand {
    #[command(about = "Parse every .nxml under a directory into ClickHouse")]
    Nxml {
        #[arg(long)]
        root: PathBuf,
        #[arg(long, default_value_t = 8)]
        workers: usize,
    },
    #[command(about = "Split scale-bar values and map units onto standard units")]
    ScaleBarUnits {
        /// CSV or XLSX with `value` and `units` columns
        #[arg(long)]
        input: PathBuf,
        /// Directory of <unit>.csv spelling lists
        #[arg(long)]
        units_dir: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct FetchArgs {
    #[command(subcommand)]
    command: FetchCommand,
}

#[derive(Subcommand)]
enum FetchCommand {
    #[command(about = "Describe UBERON ids through BioPortal")]
    Bioportal {
        /// CSV with a `uberon_id` column
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    #[command(about = "Export ontology classes from the OLS dump")]
    Ols {
        #[arg(long, default_value = ols::DUMP_URL)]
        url: String,
        /// Local copy of the gzip dump; downloaded when missing
        #[arg(long)]
        gz: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        start: usize,
        #[arg(long)]
        end: Option<usize>,
    },
    #[command(about = "Reduce exported OLS parts to ids, labels and definitions")]
    OlsClean {
        #[arg(long)]
        in_dir: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long)]
        start: usize,
        #[arg(long)]
        end: usize,
    },
    #[command(about = "Merge manual pmc_result_<ftu>.txt lists")]
    PmcLists {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    #[command(about = "Download the OA manifest and join it with the id list")]
    PmcManifest {
        #[arg(long)]
        ids: PathBuf,
        #[arg(long)]
        manifest: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = pmc::MANIFEST_URL)]
        url: String,
        /// Use the manifest already on disk
        #[arg(long)]
        skip_download: bool,
    },
    #[command(about = "Download article packages listed in the joined CSV")]
    PmcDownload {
        #[arg(long)]
        joined: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        #[arg(long, default_value = pmc::PACKAGE_BASE_URL)]
        base_url: String,
        #[arg(long, default_value_t = 30)]
        workers: usize,
    },
    #[command(about = "Unpack every downloaded package in place")]
    PmcUntar {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        error_log: PathBuf,
        #[arg(long, default_value_t = 8)]
        workers: usize,
    },
    #[command(about = "List one image path per figure")]
    PmcImages {
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MinerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MinerError) -> u8 {
    match error {
        MinerError::MissingConfig(_)
        | MinerError::ConfigRead(_)
        | MinerError::MissingInput(_)
        | MinerError::MissingColumn { .. }
        | MinerError::MissingRoundFile(_)
        | MinerError::NoPreviousRound(_) => 2,
        MinerError::ChatHttp(_)
        | MinerError::ChatStatus { .. }
        | MinerError::ChatResponse(_)
        | MinerError::ClickHouseHttp(_)
        | MinerError::ClickHouseStatus { .. }
        | MinerError::BioportalHttp(_)
        | MinerError::BioportalStatus { .. }
        | MinerError::DownloadHttp(_)
        | MinerError::DownloadStatus { .. } => 3,
        MinerError::RoundLimitReached { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = OutputMode::from_flag(cli.json);
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Tag(args) => run_tag(args.command, &config, mode),
        Commands::Eval(args) => run_eval(args.command, mode),
        Commands::Bench(args) => run_bench(args.command, &config, mode),
        Commands::Extract(args) => run_extract(args.command, &config, mode),
        Commands::Fetch(args) => run_fetch(args.command, &config, mode),
    }
}

fn emit<T: Serialize>(mode: OutputMode, value: &T, human: impl FnOnce(&T) -> String) -> miette::Result<()> {
    match mode {
        OutputMode::Json => JsonOutput::print_json(value).into_diagnostic(),
        OutputMode::Human => {
            println!("{}", human(value));
            Ok(())
        }
    }
}

fn sink_for(mode: OutputMode) -> &'static dyn ProgressSink {
    match mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    }
}

fn run_tag(command: TagCommand, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let store = Store::new(config.data_root.clone());
    let options = |workers: Option<usize>| BatchOptions {
        batch_size: config.batch_size,
        workers,
    };
    match command {
        TagCommand::Init {
            domain,
            master,
            force,
        } => {
            let report = rounds::init(&store, domain.domain, master.as_deref(), force)?;
            emit(mode, &report, |report| {
                format!("{}: {} items in {}", report.domain, report.items, report.input)
            })
        }
        TagCommand::Classify { domain, workers } => {
            let app = chat_app(store, config, options(workers))?;
            let report = app.classify(domain.domain, sink_for(mode))?;
            emit(mode, &report, |report| {
                format!(
                    "{} round {}: {} classified ({} unresolved), {} already done",
                    report.domain, report.round, report.processed, report.unresolved, report.skipped
                )
            })
        }
        TagCommand::Merge { domain } => {
            let round = RoundFile::for_domain(&store, domain.domain).read()?;
            let report = rounds::merge_round(&store, domain.domain, round)?;
            emit(mode, &report, |report| {
                format!(
                    "{} round {}: {} rows from {} batch files -> {}",
                    report.domain, report.round, report.rows, report.batch_files, report.path
                )
            })
        }
        TagCommand::Advance { domain } => {
            let report = rounds::advance(&store, domain.domain, config.max_rounds)?;
            emit(mode, &report, |report| {
                format!(
                    "{} round {} -> {}: {} agreed, {} agreed others, {} carried",
                    report.domain,
                    report.from_round,
                    report.to_round,
                    report.same,
                    report.same_others,
                    report.carried
                )
            })
        }
        TagCommand::Run { domain, workers } => {
            let app = chat_app(store, config, options(workers))?;
            let report = app.run(domain.domain, sink_for(mode))?;
            emit(mode, &report, |report| {
                format!(
                    "{} converged at round {} after {} rounds",
                    report.domain,
                    report.final_round,
                    report.rounds.len()
                )
            })
        }
        TagCommand::Status { domain } => {
            let report = rounds::status(&store, domain.domain)?;
            emit(mode, &report, |report| {
                format!(
                    "{} round {}: {} of {} items processed in {} batch files{}",
                    report.domain,
                    report.round,
                    report.processed,
                    report
                        .input_items
                        .map(|items| items.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    report.batch_files,
                    if report.merged { ", merged" } else { "" }
                )
            })
        }
        TagCommand::Finalize { domain, master } => {
            let report = finalize(&store, domain.domain, master.as_deref())?;
            emit(mode, &report, |report| {
                format!(
                    "{}: {} rows tagged, {} defaulted -> {}",
                    report.domain, report.tagged, report.defaulted, report.output
                )
            })
        }
    }
}

fn chat_app(
    store: Store,
    config: &ResolvedConfig,
    options: BatchOptions,
) -> Result<TagApp<OllamaChatClient>, MinerError> {
    let client = OllamaChatClient::new(&config.chat)?;
    let classifier = Classifier::new(client, config.chat.model.clone(), config.chat.attempts)
        .with_retry_delay(config.chat.retry_delay);
    Ok(TagApp::new(store, classifier, options, config.max_rounds))
}

fn run_eval(command: EvalCommand, mode: OutputMode) -> miette::Result<()> {
    match command {
        EvalCommand::Ontology {
            synonyms,
            predictions,
            gt_column,
            models,
            out,
        } => {
            let index = SynonymIndex::from_csv(&synonyms)?;
            let table = read_table(&predictions)?;
            let evaluation = evaluate(
                &index,
                &table,
                &gt_column,
                &models,
                &predictions.display().to_string(),
            )?;
            let summary_path = write_evaluation(&out, &evaluation)?;
            let result = json!({
                "detailed": out.display().to_string(),
                "summary": summary_path.display().to_string(),
                "models": evaluation.summaries,
            });
            emit(mode, &result, |_| {
                evaluation
                    .summaries
                    .iter()
                    .map(|summary| {
                        format!(
                            "{}: micro F1 {:.4}, macro F1 {:.4} over {} rows",
                            summary.model, summary.micro_f1, summary.macro_f1, summary.n_samples
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        EvalCommand::Jaccard { left, right } => {
            let left = Labels::parse_cell(&left)?;
            let right = Labels::parse_cell(&right)?;
            let score = jaccard_lists(left.as_slice(), right.as_slice());
            emit(mode, &json!({ "jaccard": score }), |_| format!("{score:.4}"))
        }
        EvalCommand::ScaleBar {
            sample,
            responses_dir,
            models,
            out_dir,
        } => {
            let reports = scale_bar::evaluate_models(&sample, &responses_dir, &models, &out_dir)?;
            emit(mode, &reports, |reports| {
                reports
                    .iter()
                    .map(|report| match &report.output {
                        Some(output) => format!(
                            "{}: {} rows -> {} ({})",
                            report.model,
                            report.rows,
                            output.display(),
                            report
                                .means
                                .iter()
                                .map(|(key, mean)| format!("{key} {mean:.4}"))
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                        None => format!("{}: no responses", report.model),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
    }
}

fn bench_table(args: BenchTableArg, config: &ResolvedConfig) -> BenchmarkTable {
    let models = if args.models.is_empty() {
        config.models.keys().cloned().collect()
    } else {
        args.models
    };
    BenchmarkTable::new(args.table, models)
}

fn run_bench(command: BenchCommand, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let store = ClickHouseHttpStore::new(&config.clickhouse)?;
    match command {
        BenchCommand::Import {
            table,
            answers,
            prompts,
        } => {
            let table = bench_table(table, config);
            let rows = benchmark::import(&store, &table, &read_table(&answers)?, &read_table(&prompts)?)?;
            emit(mode, &json!({ "table": table.name, "rows": rows }), |_| {
                format!("{rows} rows imported into {}", table.name)
            })
        }
        BenchCommand::Query { table, attempts } => {
            let table = bench_table(table, config);
            let client = GatewayChatClient::new(&config.gateway)?;
            let models: BTreeMap<String, String> = config.models.clone();
            let reports = benchmark::query_models(
                &store,
                &table,
                &client,
                &models,
                attempts.unwrap_or(config.gateway.attempts),
                sink_for(mode),
            )?;
            emit(mode, &reports, |reports| {
                reports
                    .iter()
                    .map(|report| {
                        format!("{}: {} rows ({} empty)", report.model, report.rows, report.empty)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        BenchCommand::Score {
            table,
            scorer,
            workers,
        } => {
            let table = bench_table(table, config);
            let reports = benchmark::score(&store, &table, scorer, workers)?;
            emit(mode, &reports, |reports| {
                reports
                    .iter()
                    .map(|report| format!("{}: {} rows, mean {:.4}", report.model, report.rows, report.mean))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        BenchCommand::Annotate {
            job,
            prompt_file,
            model,
            attempts,
            no_import,
        } => {
            let prompt = std::fs::read_to_string(&prompt_file)
                .map_err(|_| MinerError::MissingInput(prompt_file.clone()))?;
            let mut options = JobOptions::new(job, prompt);
            options.attempts = attempts;
            options.import = !no_import;
            if let Some(model) = model {
                options.model = model;
            }
            let client = GatewayChatClient::new(&config.gateway)?;
            let report = annotate::run_job(&store, job, &client, &options, sink_for(mode))?;
            emit(mode, &report, |report| {
                format!(
                    "{} ({}): {} of {} pending answered ({} without JSON, {} failed), {} detail rows",
                    job.key(),
                    report.model,
                    report.answers.answered,
                    report.answers.pending,
                    report.answers.unparsed,
                    report.answers.failed,
                    report.details
                )
            })
        }
        BenchCommand::Expand { job } => {
            let rows = annotate::rebuild_details(&store, job)?;
            emit(mode, &json!({ "table": job.detail_table(), "rows": rows }), |_| {
                format!("{rows} rows written to {}", job.detail_table())
            })
        }
    }
}

fn run_extract(command: ExtractCommand, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    match command {
        ExtractCommand::Nxml { root, workers } => {
            let store = ClickHouseHttpStore::new(&config.clickhouse)?;
            let report = extract_dir(&root, &store, workers, sink_for(mode))?;
            emit(mode, &report, |report| {
                let tables = report
                    .inserted
                    .iter()
                    .map(|(table, rows)| format!("{table}={rows}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!(
                    "{} of {} articles parsed ({} failed); {tables}",
                    report.parsed, report.files, report.failed
                )
            })
        }
        ExtractCommand::ScaleBarUnits {
            input,
            units_dir,
            output,
        } => {
            let report = scale_bar::clean_value_file(&input, &units_dir, &output)?;
            emit(mode, &report, |report| {
                format!(
                    "{} rows, {} mapped to a standard unit -> {}",
                    report.rows,
                    report.standardized,
                    output.display()
                )
            })
        }
    }
}

fn run_fetch(command: FetchCommand, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let downloader = || HttpDownloader::new(Duration::from_secs(600));
    match command {
        FetchCommand::Bioportal { input, output } => {
            let api_key = config.bioportal_api_key.clone().ok_or_else(|| {
                MinerError::ConfigInvalid(
                    "bioportal_api_key is not set (config or BIOPORTAL_API_KEY)".to_string(),
                )
            })?;
            let client = BioportalHttpClient::new(api_key)?;
            let rows = describe_csv(&client, &input, &output, sink_for(mode))?;
            emit(mode, &json!({ "rows": rows, "output": output }), |_| {
                format!("{rows} descriptions written to {}", output.display())
            })
        }
        FetchCommand::Ols {
            url,
            gz,
            out_dir,
            start,
            end,
        } => {
            let report =
                ols::fetch_and_export(&downloader()?, &url, &gz, start, end, &out_dir, sink_for(mode))?;
            emit(mode, &report, |report| {
                format!(
                    "{} ontologies exported to {} files ({} without classes)",
                    report.ontologies,
                    report.files.len(),
                    report.empty.len()
                )
            })
        }
        FetchCommand::OlsClean {
            in_dir,
            out_dir,
            start,
            end,
        } => {
            let report = ols::clean_parts(&in_dir, &out_dir, start, end)?;
            emit(mode, &report, |report| {
                format!(
                    "{} parts cleaned, {} already present, {} failed",
                    report.written.len(),
                    report.skipped,
                    report.failed
                )
            })
        }
        FetchCommand::PmcLists { dir, out } => {
            let rows = pmc::merge_manual_lists(&dir, &out)?;
            emit(mode, &json!({ "rows": rows, "output": out }), |_| {
                format!("{rows} ftu/pmcid pairs written to {}", out.display())
            })
        }
        FetchCommand::PmcManifest {
            ids,
            manifest,
            out,
            url,
            skip_download,
        } => {
            if !skip_download {
                pmc::download_manifest(&downloader()?, &url, &manifest)?;
            }
            let rows = pmc::join_manifest(&ids, &manifest, &out)?;
            emit(mode, &json!({ "rows": rows, "output": out }), |_| {
                format!("{rows} joined rows written to {}", out.display())
            })
        }
        FetchCommand::PmcDownload {
            joined,
            out_dir,
            base_url,
            workers,
        } => {
            let report = pmc::download_packages(
                &downloader()?,
                &joined,
                &out_dir,
                &base_url,
                workers,
                sink_for(mode),
            )?;
            emit(mode, &report, |report| {
                format!(
                    "{} downloaded, {} skipped, {} failed",
                    report.downloaded, report.skipped, report.failed
                )
            })
        }
        FetchCommand::PmcUntar {
            root,
            error_log,
            workers,
        } => {
            let report = pmc::untar_all(&root, &error_log, workers)?;
            emit(mode, &report, |report| {
                format!("{} extracted, {} failed", report.extracted, report.errors.len())
            })
        }
        FetchCommand::PmcImages { root, out } => {
            let images = pmc::collect_image_paths(&root, &out)?;
            emit(mode, &json!({ "images": images, "output": out }), |_| {
                format!("{images} image paths written to {}", out.display())
            })
        }
    }
}
