//! # transparencia
//!
//! Command-line front end for the contract ingestion pipeline. Every command
//! prints a JSON response on stdout; logs go to stderr.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use transparencia::db::import_repo;
use transparencia::ingest::UploadOutcome;
use transparencia::model::FileFormat;
use transparencia::telemetry::{init_tracing, LogFormat};
use transparencia::worker::{fail_unfinished, DirectoryScanner, ImportTask, ImportWorkerPool};
use transparencia::{
    backfill_contracts, load_config, ApiResponse, Config, Database, FileStorage, ImportListFilter,
    ImportStatus, IngestionOrchestrator, ProcessorRegistry, QueryService, UploadRequest,
    UploadService,
};

#[derive(Parser)]
#[command(name = "transparencia")]
#[command(about = "Contract ingestion for transparency portals")]
#[command(version)]
struct Cli {
    /// Config file (JSON or YAML). Defaults apply when omitted.
    #[arg(long, short, env = "TRANSPARENCIA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log output format: pretty or json
    #[arg(long, env = "TRANSPARENCIA_LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload and process files or directories of files
    Import {
        /// Files or directories to import
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Directorate for records that carry none (required for PDFs)
        #[arg(long)]
        diretoria: Option<String>,

        /// Uploader recorded on the import
        #[arg(long)]
        user: Option<String>,

        /// Descend into subdirectories
        #[arg(long, default_value_t = false)]
        recursive: bool,

        /// Worker threads for multi-file imports (default from config)
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Status and counters of an import
    Status { import_id: String },

    /// Records of an import, paginated
    Contracts {
        import_id: String,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long)]
        per_page: Option<u64>,
    },

    /// List imports, newest first
    Imports {
        #[arg(long, value_parser = parse_status)]
        status: Option<ImportStatus>,

        #[arg(long, value_parser = parse_format)]
        format: Option<FileFormat>,

        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: u64,

        #[arg(long)]
        per_page: Option<u64>,
    },

    /// One contract, with empty fields recovered from its source columns
    Show { contract_id: i64 },

    /// Delete an import, its records and its stored file
    Delete { import_id: String },

    /// Persist fields recoverable from source columns on stored contracts
    Backfill {
        /// Maximum contracts to scan (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: u64,
    },
}

fn parse_status(value: &str) -> std::result::Result<ImportStatus, String> {
    ImportStatus::parse(&value.to_lowercase())
        .ok_or_else(|| format!("unknown status '{}' (pending, processing, completed, failed)", value))
}

fn parse_format(value: &str) -> std::result::Result<FileFormat, String> {
    FileFormat::parse(&value.to_lowercase())
        .ok_or_else(|| format!("unknown format '{}' (csv, excel, xml, pdf)", value))
}

struct App {
    config: Config,
    db: Database,
    orchestrator: IngestionOrchestrator,
}

impl App {
    fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.database_file()).with_context(|| {
            format!("Failed to open database at {}", config.database_path)
        })?;
        let registry = Arc::new(ProcessorRegistry::new(&config));
        let orchestrator = IngestionOrchestrator::new(db.clone(), registry);
        Ok(Self {
            config,
            db,
            orchestrator,
        })
    }

    fn storage(&self) -> FileStorage {
        FileStorage::new(self.config.storage_path())
    }

    fn uploads(&self) -> UploadService {
        UploadService::new(
            self.orchestrator.clone(),
            self.storage(),
            self.config.max_upload_bytes,
        )
    }

    fn queries(&self) -> QueryService {
        QueryService::new(
            self.db.clone(),
            self.storage(),
            self.config.pagination.clone(),
        )
    }
}

fn main() {
    let cli = Cli::parse();

    let format = LogFormat::parse(&cli.log_format).unwrap_or_default();
    if let Err(e) = init_tracing(format) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

/// Returns whether every reported response succeeded.
fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    let app = App::open(config)?;

    match cli.command {
        Commands::Import {
            paths,
            diretoria,
            user,
            recursive,
            workers,
        } => import(&app, &paths, diretoria, user, recursive, workers),
        Commands::Status { import_id } => print_response(ApiResponse::from_result(
            app.queries().import_status(&import_id),
            "Status da importação",
            "Erro ao consultar importação",
        )),
        Commands::Contracts {
            import_id,
            page,
            per_page,
        } => print_response(ApiResponse::from_result(
            app.queries().import_contracts(&import_id, page, per_page),
            "Contratos da importação",
            "Erro ao listar contratos",
        )),
        Commands::Imports {
            status,
            format,
            user,
            page,
            per_page,
        } => {
            let filter = ImportListFilter {
                status,
                format,
                user_id: user,
                page: Some(page),
                per_page,
            };
            print_response(ApiResponse::from_result(
                app.queries().list_imports(&filter),
                "Importações",
                "Erro ao listar importações",
            ))
        }
        Commands::Show { contract_id } => print_response(ApiResponse::from_result(
            app.queries().contract_view(contract_id),
            "Contrato",
            "Erro ao consultar contrato",
        )),
        Commands::Delete { import_id } => print_response(ApiResponse::from_result(
            app.queries().delete_import(&import_id),
            "Importação deletada com sucesso",
            "Erro ao deletar importação",
        )),
        Commands::Backfill { limit } => {
            let result = backfill_contracts(&app.db, limit)
                .map(|(scanned, updated)| {
                    serde_json::json!({ "processados": scanned, "atualizados": updated })
                })
                .map_err(Into::into);
            print_response(ApiResponse::from_result(
                result,
                "Campos preenchidos a partir dos dados originais",
                "Erro ao preencher campos",
            ))
        }
    }
}

fn import(
    app: &App,
    paths: &[PathBuf],
    diretoria: Option<String>,
    user: Option<String>,
    recursive: bool,
    workers: Option<usize>,
) -> Result<bool> {
    let files = collect_files(paths, recursive);
    if files.is_empty() {
        anyhow::bail!("No importable files found");
    }
    tracing::info!(files = files.len(), "Importing");
    let uploads = app.uploads();

    let request_for = |path: &Path| -> Result<UploadRequest> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok(UploadRequest::new(filename, bytes)
            .with_diretoria(diretoria.clone())
            .with_user(user.clone()))
    };

    if let [single] = files.as_slice() {
        let response = ApiResponse::from_result(
            uploads.upload(request_for(single)?),
            "Arquivo importado com sucesso",
            "Erro ao processar arquivo",
        );
        return print_response(response);
    }

    // Stage everything first so validation problems surface before any work.
    let mut responses: Vec<ApiResponse<UploadOutcome>> = Vec::new();
    let mut staged = Vec::new();
    for path in &files {
        match uploads.stage(request_for(path)?) {
            Ok(job) => staged.push(job),
            Err(e) => responses.push(ApiResponse::from_error("Erro ao processar arquivo", &e)),
        }
    }

    let worker_count = workers.unwrap_or(app.config.worker_count).max(1);
    let pool = ImportWorkerPool::new(app.orchestrator.clone(), worker_count);
    let tasks = staged
        .iter()
        .map(|job| ImportTask::new(&job.id).with_fallback(job.metadata.diretoria.clone()))
        .collect();
    let results = pool.run_all(tasks);
    pool.shutdown();
    pool.wait();

    let results = match results {
        Ok(results) => results,
        Err(e) => {
            let ids: Vec<String> = staged.iter().map(|job| job.id.clone()).collect();
            let marked = fail_unfinished(&app.db, &ids, "Worker pool stopped before processing")?;
            return Err(e).with_context(|| format!("{} staged imports marked failed", marked));
        }
    };

    for result in results {
        let response = if result.is_success() {
            let job = import_repo::find_by_id(&app.db, &result.import_id)?
                .with_context(|| format!("Import {} vanished", result.import_id))?;
            ApiResponse::from_result(
                uploads.summarize(job),
                "Arquivo importado com sucesso",
                "Erro ao processar arquivo",
            )
        } else {
            ApiResponse {
                success: false,
                message: "Erro ao processar arquivo".to_string(),
                data: None,
                errors: None,
                error: result.error,
            }
        };
        responses.push(response);
    }

    let all_ok = responses.iter().all(|r| r.success);
    print_json(&responses)?;
    Ok(all_ok)
}

/// Files named directly plus supported files found in named directories.
fn collect_files(paths: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(DirectoryScanner::new(path).recursive(recursive).scan());
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn print_response<T: Serialize>(response: ApiResponse<T>) -> Result<bool> {
    print_json(&response)?;
    Ok(response.success)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize response")?;
    println!("{}", json);
    Ok(())
}
