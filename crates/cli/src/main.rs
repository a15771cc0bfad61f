use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use storefront_apply::{
    delete_all_products, delete_product, list_products, load_product, load_variants, submit_product, sync_variants,
    AttachedFile, FormGroup, SubmitError,
};
use storefront_core::{ChangeSet, DraftColorGroup, PersistedVariant, ProductFields, ProductType, ProductWithDetails};
use storefront_persist::SqliteBackend;
use storefront_reconcile::{detect_variant_changes, generate_sku, prepare_sync, validate_draft, ValidationReport};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "storefrontctl", version, about = "Storefront variant tooling")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// SQLite database (default: $STOREFRONT_DB_PATH or ~/.storefront/storefront.db)
    #[arg(long = "db", global = true, env = "STOREFRONT_DB_PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the generated SKU for a product slug, color and size
    Sku { slug: String, color: String, size: String },
    /// Validate a draft file (duplicates, SKUs, stock)
    Check {
        /// Draft color groups, JSON or YAML
        draft: PathBuf,
    },
    /// Show the change-set between stored variants and a draft
    Diff {
        /// Persisted variants, JSON or YAML
        #[arg(long)]
        original: PathBuf,
        draft: PathBuf,
    },
    /// Reconcile a product's variants in the database with a draft
    Sync {
        #[arg(long)]
        product: String,
        /// SKU prefix for generated SKUs (default: the product's slug)
        #[arg(long)]
        slug: Option<String>,
        draft: PathBuf,
        /// Print the plan without applying it
        #[arg(long = "dry-run", action = ArgAction::SetTrue)]
        dry_run: bool,
    },
    /// Create or update a product from a form file (fields, variants, images)
    Submit {
        form: PathBuf,
        /// Existing product to update
        #[arg(long)]
        product: Option<String>,
    },
    /// Print a product with its variants and images
    Show {
        #[arg(long)]
        product: String,
    },
    /// List products, newest first
    List {
        /// Only products of this type (clothes, shoes, accessories)
        #[arg(long = "type", value_parser = ProductType::from_str)]
        product_type: Option<ProductType>,
    },
    /// Delete a product together with its variants and images
    Delete {
        #[arg(long)]
        product: String,
    },
    /// Delete every product, variant and image row
    DeleteAll {
        /// Required; there is no undo
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
}

#[derive(Debug, Deserialize)]
struct FormFile {
    #[serde(flatten)]
    fields: ProductFields,
    #[serde(default)]
    variants: Vec<FormFileGroup>,
}

#[derive(Debug, Deserialize)]
struct FormFileGroup {
    #[serde(flatten)]
    draft: DraftColorGroup,
    /// Image files, relative to the form file.
    #[serde(default)]
    images: Vec<PathBuf>,
}

fn init_tracing() {
    let env = std::env::var("STOREFRONT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("STOREFRONT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid STOREFRONT_METRICS_ADDR; expected host:port");
        }
    }
}

/// Parse JSON or YAML, chosen by file extension.
fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let yaml = matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"));
    if yaml {
        serde_yaml::from_str(&text).with_context(|| format!("parsing YAML {}", path.display()))
    } else {
        serde_json::from_str(&text).with_context(|| format!("parsing JSON {}", path.display()))
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}

fn open_db(path: Option<&str>) -> Result<SqliteBackend> {
    match path {
        Some(p) => SqliteBackend::open(p),
        None => SqliteBackend::open_default(),
    }
}

fn print_changes(cs: &ChangeSet) {
    for v in &cs.to_create {
        println!("+ {} / {}  stock={} sku={}", v.color, v.size, v.stock, v.sku.as_deref().unwrap_or("-"));
    }
    for v in &cs.to_update {
        println!(
            "~ {} {} / {}  stock={} sku={}",
            v.id.as_deref().unwrap_or("?"),
            v.color,
            v.size,
            v.stock,
            v.sku.as_deref().unwrap_or("-")
        );
    }
    for id in &cs.to_delete {
        println!("- {}", id);
    }
    println!("{}", cs.summary());
}

fn print_product(p: &ProductWithDetails) {
    println!("{} ({})  {}  price={:.2}", p.product.name, p.product.slug, p.product.id, p.product.price);
    println!("COLOR        SIZE     STOCK  SKU");
    for v in &p.product_variants {
        println!(
            "{:<12} {:<8} {:>5}  {}",
            v.color.as_deref().unwrap_or("-"),
            v.size.as_deref().unwrap_or("-"),
            v.stock,
            v.sku.as_deref().unwrap_or("-")
        );
    }
    for img in &p.product_images {
        let mark = if img.is_primary { "*" } else { " " };
        println!("{} [{}] {}", mark, img.display_order, img.image_url);
    }
}

/// Validation failures print a report and exit non-zero.
fn validated(groups: &[DraftColorGroup], output: Output) -> Result<ValidationReport> {
    match validate_draft(groups) {
        Ok(report) => Ok(report),
        Err(errs) => {
            match output {
                Output::Human => eprintln!("invalid draft: {}", errs),
                Output::Json => println!("{}", serde_json::to_string_pretty(&errs)?),
            }
            std::process::exit(2);
        }
    }
}

fn warn_all(report: &ValidationReport) {
    for w in &report.warnings {
        eprintln!("warning: {}", w);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let db_path = cli.db.as_deref();

    match cli.command {
        Commands::Sku { slug, color, size } => {
            println!("{}", generate_sku(&slug, &color, &size));
        }
        Commands::Check { draft } => {
            let groups: Vec<DraftColorGroup> = load_file(&draft)?;
            info!(groups = groups.len(), "check invoked");
            let report = validated(&groups, cli.output)?;
            match cli.output {
                Output::Human => {
                    for w in &report.warnings {
                        println!("warning: {}", w);
                    }
                    println!("ok");
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Diff { original, draft } => {
            let originals: Vec<PersistedVariant> = load_file(&original)?;
            let groups: Vec<DraftColorGroup> = load_file(&draft)?;
            warn_all(&validated(&groups, cli.output)?);
            let cs = detect_variant_changes(&originals, &groups)?;
            match cli.output {
                Output::Human => print_changes(&cs),
                Output::Json => println!("{}", serde_json::to_string_pretty(&cs)?),
            }
        }
        Commands::Sync { product, slug, draft, dry_run } => {
            let groups: Vec<DraftColorGroup> = load_file(&draft)?;
            warn_all(&validated(&groups, cli.output)?);
            let db = open_db(db_path)?;
            let slug = match slug {
                Some(s) => s,
                None => load_product(&db, &product).await.with_context(|| format!("loading product {}", product))?.product.slug,
            };
            let originals = load_variants(&db, &product).await.context("loading variants")?;
            let cs = detect_variant_changes(&originals, &groups)?;
            let plan = prepare_sync(&product, &slug, &cs);
            info!(product = %product, changes = %cs.summary(), dry_run, "sync invoked");
            if dry_run {
                if plan.is_empty() && cli.output == Output::Human {
                    println!("nothing to apply");
                    return Ok(());
                }
                match cli.output {
                    Output::Human => print_changes(&cs),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
                }
                return Ok(());
            }
            match sync_variants(&db, &product, &plan).await {
                Ok(outcome) => match cli.output {
                    Output::Human => println!(
                        "created {}, updated {}, deleted {}",
                        outcome.created.len(),
                        outcome.updated.len(),
                        outcome.deleted.len()
                    ),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
                },
                Err(failure) => {
                    error!(stage = %failure.stage, error = %failure.source, "sync failed");
                    if cli.output == Output::Json {
                        println!("{}", serde_json::to_string_pretty(&failure.partial)?);
                    }
                    bail!("{} (re-run `show --product {}` to see what was stored)", failure, product);
                }
            }
        }
        Commands::Submit { form, product } => {
            let file: FormFile = load_file(&form)?;
            let base = form.parent().map(Path::to_path_buf).unwrap_or_default();
            let mut groups = Vec::with_capacity(file.variants.len());
            for g in file.variants {
                let mut files = Vec::with_capacity(g.images.len());
                for rel in &g.images {
                    let path = base.join(rel);
                    let data = std::fs::read(&path).with_context(|| format!("reading image {}", path.display()))?;
                    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("image").to_string();
                    files.push(AttachedFile::new(name, content_type_for(&path), data));
                }
                groups.push(FormGroup { draft: g.draft, files });
            }
            let db = open_db(db_path)?;
            let original = match &product {
                Some(id) => Some(load_product(&db, id).await.with_context(|| format!("loading product {}", id))?),
                None => None,
            };
            let report = match submit_product(&db, &file.fields, &groups, original.as_ref()).await {
                Ok(r) => r,
                Err(SubmitError::Validation(errs)) => {
                    eprintln!("invalid draft: {}", errs);
                    std::process::exit(2);
                }
                Err(e) => return Err(e).context("submit failed"),
            };
            match cli.output {
                Output::Human => {
                    for w in &report.warnings {
                        eprintln!("warning: {}", w);
                    }
                    println!("product {} ({})", report.product.id, report.product.slug);
                    println!("variants: {}", report.changes);
                    println!("images: {}", report.images);
                    for f in &report.images.failed {
                        eprintln!("image {} ({}) failed: {}", f.file, f.color, f.error);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            }
        }
        Commands::Show { product } => {
            let db = open_db(db_path)?;
            let p = load_product(&db, &product).await.with_context(|| format!("loading product {}", product))?;
            match cli.output {
                Output::Human => print_product(&p),
                Output::Json => println!("{}", serde_json::to_string_pretty(&p)?),
            }
        }
        Commands::List { product_type } => {
            let db = open_db(db_path)?;
            let products = list_products(&db, product_type).await.context("listing products")?;
            match cli.output {
                Output::Human => {
                    println!("{:<36}  {:<24} {:<12} {:>9} {:>8} {:>6}", "ID", "SLUG", "TYPE", "PRICE", "VARIANTS", "IMAGES");
                    for p in &products {
                        println!(
                            "{:<36}  {:<24} {:<12} {:>9.2} {:>8} {:>6}",
                            p.product.id,
                            p.product.slug,
                            p.product.product_type,
                            p.product.price,
                            p.product_variants.len(),
                            p.product_images.len()
                        );
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&products)?),
            }
        }
        Commands::Delete { product } => {
            let db = open_db(db_path)?;
            let summary = delete_product(&db, &product).await.with_context(|| format!("deleting product {}", product))?;
            match cli.output {
                Output::Human => println!("deleted {} ({} variants, {} images)", product, summary.variants, summary.images),
                Output::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
            }
        }
        Commands::DeleteAll { yes } => {
            if !yes {
                bail!("refusing to delete every product without --yes");
            }
            let db = open_db(db_path)?;
            let deleted = delete_all_products(&db).await.context("deleting all products")?;
            match cli.output {
                Output::Human => println!("deleted {} products", deleted),
                Output::Json => println!("{}", serde_json::json!({ "deleted_count": deleted })),
            }
        }
    }
    Ok(())
}
