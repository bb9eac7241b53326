use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use oci_spec::image::MediaType;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use tagbook_core::types::{IndexData, ManifestData};
use tagbook_core::{
    AccessControlContext, Filter, MetaDb, PageInput, RequestContext, SearchResults, SortCriteria,
};

mod config;
use crate::config::Config;

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Act as this user; access control is disabled when omitted.
    #[arg(short, long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, default_value_t = 0)]
    limit: i32,
    #[arg(long, default_value_t = 0)]
    offset: i32,
    #[arg(long, default_value = "ALPHABETIC_ASC")]
    sort_by: SortCriteria,
    /// Accepted operating systems.
    #[arg(long)]
    os: Vec<String>,
    /// Accepted architectures.
    #[arg(long)]
    arch: Vec<String>,
    #[arg(long)]
    signed: Option<bool>,
}

impl PageArgs {
    fn page(&self) -> PageInput {
        PageInput::new(self.limit, self.offset, self.sort_by)
    }

    fn filter(&self) -> Filter {
        Filter {
            os: self.os.clone(),
            arch: self.arch.clone(),
            has_to_be_signed: self.signed,
            ..Default::default()
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print a repository record.
    GetRepo { repo: String },
    /// Point a tag (or a digest) of a repository at a manifest or index.
    SetReference {
        repo: String,
        reference: String,
        digest: String,
        #[arg(long)]
        index: bool,
    },
    DeleteTag { repo: String, tag: String },
    /// Store a manifest and its config blob under the manifest digest.
    PutManifest {
        digest: String,
        manifest: PathBuf,
        config: PathBuf,
    },
    /// Store an index blob under its digest.
    PutIndex { digest: String, index: PathBuf },
    /// Count one download of a tag or digest.
    Pull { repo: String, reference: String },
    SearchRepos {
        text: String,
        #[command(flatten)]
        page: PageArgs,
    },
    /// Search tags with a `<repo>:<tag prefix>` query.
    SearchTags {
        query: String,
        #[command(flatten)]
        page: PageArgs,
    },
    Star { repo: String },
    Bookmark { repo: String },
    Starred,
    Bookmarked,
    Referrers {
        repo: String,
        subject: String,
        #[arg(long)]
        artifact_type: Vec<String>,
    },
}

fn read_file(path: &PathBuf) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut bs = Vec::new();
    f.read_to_end(&mut bs)?;
    Ok(bs)
}

fn print_results(results: &SearchResults) -> Result<()> {
    let manifests: Vec<&String> = results.manifests.keys().collect();
    let indexes: Vec<&String> = results.indexes.keys().collect();
    let out = json!({
        "repos": results.repos,
        "manifests": manifests,
        "indexes": indexes,
        "page": results.page,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let mut config_file = File::open(cli.config_file.unwrap_or("./tagbook.yml".into()))?;
    let mut s = String::new();
    config_file.read_to_string(&mut s)?;
    let config: Config = serde_yaml::from_str(&s)?;

    // initialize persistence layer
    let db = MetaDb::open(config.backend.new_backend().await?).await?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling request");
            on_interrupt.cancel();
        }
    });

    let mut ctx = RequestContext::background().with_cancellation(token);
    if let Some(user) = cli.user {
        let mut patterns = HashMap::new();
        patterns.insert(String::from("**"), true);
        ctx = ctx.with_access(AccessControlContext::new(user, patterns));
    }

    match cli.command {
        Command::GetRepo { repo } => print(&db.get_user_repo_meta(&ctx, &repo).await?)?,
        Command::SetReference {
            repo,
            reference,
            digest,
            index,
        } => {
            let media_type = if index {
                MediaType::ImageIndex
            } else {
                MediaType::ImageManifest
            };
            db.set_repo_reference(&repo, &reference, &digest, media_type)
                .await?;
        }
        Command::DeleteTag { repo, tag } => db.delete_repo_tag(&repo, &tag).await?,
        Command::PutManifest {
            digest,
            manifest,
            config,
        } => {
            let data = ManifestData {
                manifest_blob: read_file(&manifest)?,
                config_blob: read_file(&config)?,
            };
            db.set_manifest_data(&digest, &data).await?;
        }
        Command::PutIndex { digest, index } => {
            let data = IndexData {
                index_blob: read_file(&index)?,
            };
            db.set_index_data(&digest, &data).await?;
        }
        Command::Pull { repo, reference } => {
            db.increment_image_downloads(&repo, &reference).await?
        }
        Command::SearchRepos { text, page } => {
            let results = db
                .search_repos(&ctx, &text, &page.filter(), &page.page())
                .await?;
            print_results(&results)?;
        }
        Command::SearchTags { query, page } => {
            let results = db
                .search_tags(&ctx, &query, &page.filter(), &page.page())
                .await?;
            print_results(&results)?;
        }
        Command::Star { repo } => print(&db.toggle_star_repo(&ctx, &repo).await?)?,
        Command::Bookmark { repo } => print(&db.toggle_bookmark_repo(&ctx, &repo).await?)?,
        Command::Starred => print(&db.get_starred_repos(&ctx).await?)?,
        Command::Bookmarked => print(&db.get_bookmarked_repos(&ctx).await?)?,
        Command::Referrers {
            repo,
            subject,
            artifact_type,
        } => print(
            &db.get_referrers_info(&repo, &subject, &artifact_type)
                .await?,
        )?,
    }

    Ok(())
}
