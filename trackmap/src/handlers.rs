use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use trackmap_core::config::SQLITE_SENTINEL;
use trackmap_core::export::{ExportReport, summary_text, write_snapshot};
use trackmap_core::{
    Config, ConfigError, CrawlPipeline, CrawlSnapshot, DomainParser, ReferenceData, SiteOutcome,
    SiteProgressCallback,
};
use trackmap_source::{CrawlStore, JsonFileSource, SiteSource};

/// How a run reports progress on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Quiet,
    Progress,
    /// One line per finished site.
    Verbose,
}

impl OutputMode {
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Progress
        }
    }

    fn log_level(self) -> Level {
        match self {
            OutputMode::Quiet => Level::WARN,
            OutputMode::Progress => Level::INFO,
            OutputMode::Verbose => Level::DEBUG,
        }
    }
}

pub fn init_tracing(mode: OutputMode) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(mode.log_level())
        .with_writer(std::io::stderr)
        .try_init();
}

/// Expand `~` in a user-supplied path.
pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn expand_pathbuf(path: &Path) -> PathBuf {
    expand_path(&path.to_string_lossy())
}

/// Build the run configuration: the optional config file first, then every
/// command-line override, then validation.
pub fn build_config(args: &ArgMatches) -> Result<Config> {
    let mut config = match args.get_one::<String>("config") {
        Some(path) => Config::from_file(&expand_path(path))
            .with_context(|| format!("Failed to load config file {}", path))?,
        None => Config::default(),
    };

    if let Some(data) = args.get_one::<String>("data") {
        config.crawler_data_loc = Some(data.clone());
    }
    if let Some(database) = args.get_one::<String>("database") {
        config.database = Some(PathBuf::from(database));
    }
    if let Some(crawl_id) = args.get_one::<String>("crawl-id") {
        config.crawl_id = Some(crawl_id.clone());
    }
    if let Some(region) = args.get_one::<String>("region") {
        config.region_code = Some(region.clone());
    }
    if let Some(parallelism) = args.get_one::<usize>("parallelism") {
        config.parallelism = *parallelism;
    }
    if let Some(extras) = args.get_one::<String>("psl-extras") {
        config.psl_extras = Some(PathBuf::from(extras));
    }
    if let Some(reference) = args.get_one::<String>("reference") {
        config.reference_dir = Some(PathBuf::from(reference));
    }
    if let Some(output) = args.get_one::<String>("output") {
        config.output_dir = PathBuf::from(output);
    }
    if let Some(tag) = args.get_one::<String>("source-tag") {
        config.source_tag = tag.clone();
    }
    if args.get_flag("add-surrogates") {
        config.flags.add_surrogates = true;
    }

    config.crawler_data_loc = config.crawler_data_loc.map(|loc| {
        if loc == SQLITE_SENTINEL {
            loc
        } else {
            expand_path(&loc).display().to_string()
        }
    });
    config.database = config.database.as_deref().map(expand_pathbuf);
    config.psl_extras = config.psl_extras.as_deref().map(expand_pathbuf);
    config.reference_dir = config.reference_dir.as_deref().map(expand_pathbuf);
    config.output_dir = expand_pathbuf(&config.output_dir);

    config.validate()?;
    Ok(config)
}

fn progress_bar(total: usize) -> ProgressBar {
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} sites ({eta})")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

fn verbose_callback() -> SiteProgressCallback {
    Arc::new(|outcome: &SiteOutcome| match outcome {
        SiteOutcome::Folded { requests } => {
            println!("  {} site folded ({} requests)", "✓".green(), requests)
        }
        SiteOutcome::Skipped => println!("  {} site skipped (no data)", "-".yellow()),
        SiteOutcome::Failed(reason) => println!("  {} site failed: {}", "✗".red(), reason),
    })
}

/// Load reference data, run the pipeline over the configured source and
/// export the snapshot.
pub async fn process_crawl(config: &Config, mode: OutputMode) -> Result<(CrawlSnapshot, ExportReport)> {
    let reference_dir = config
        .reference_dir
        .as_deref()
        .ok_or(ConfigError::Missing("referenceDir"))?;
    let reference = Arc::new(ReferenceData::load(reference_dir)?);
    let parser = Arc::new(match &config.psl_extras {
        Some(path) => DomainParser::from_extras_file(path)?,
        None => DomainParser::new(),
    });

    let source = config.open_source()?;
    let total = source.len()?;

    let mut pipeline = CrawlPipeline::new(parser, reference)
        .with_parallelism(config.parallelism)
        .with_region_code(config.region_code.clone())
        .with_tracker_options(config.tracker_options());

    let progress = match mode {
        OutputMode::Progress => {
            let pb = progress_bar(total);
            let ticker = pb.clone();
            pipeline = pipeline.with_progress_callback(Arc::new(move |_: &SiteOutcome| ticker.inc(1)));
            Some(pb)
        }
        OutputMode::Verbose => {
            pipeline = pipeline.with_progress_callback(verbose_callback());
            None
        }
        OutputMode::Quiet => None,
    };

    let result = pipeline.run(source).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    let snapshot = result?;

    let report = write_snapshot(&snapshot, &config.output_dir)
        .with_context(|| format!("Failed to export to {}", config.output_dir.display()))?;
    Ok((snapshot, report))
}

/// Copy every record of a flat-file crawl into the crawl store.
pub fn import_crawl(dir: &Path, database: &Path, crawl_id: &str, region: Option<&str>) -> Result<usize> {
    let mut source = JsonFileSource::open(dir)?;
    let store = CrawlStore::new(database)?;
    let parser = DomainParser::new();

    let mut imported = 0;
    for site in source.sites()? {
        let site = site?;
        let domain = site
            .initial_url
            .as_deref()
            .and_then(|url| parser.parse(url).ok())
            .map(|parsed| parsed.domain().to_string());
        store.insert_site(crawl_id, region, domain.as_deref(), &site)?;
        imported += 1;
    }
    source.close();

    Ok(imported)
}

pub async fn handle_process(sub_matches: &ArgMatches) -> Result<()> {
    let mode = OutputMode::from_flags(
        sub_matches.get_flag("quiet"),
        sub_matches.get_flag("verbose"),
    );
    init_tracing(mode);

    let config = build_config(sub_matches)?;

    if mode != OutputMode::Quiet {
        println!(
            "\nProcessing crawl from {}",
            config
                .crawler_data_loc
                .as_deref()
                .unwrap_or_default()
                .bright_white()
        );
        println!("Parallelism: {}", config.parallelism);
        if let Some(region) = &config.region_code {
            println!("Region: {}", region);
        }
        println!();
    }

    let (snapshot, report) = process_crawl(&config, mode).await?;

    if mode != OutputMode::Quiet {
        print!("{}", summary_text(&snapshot.stats));
        println!(
            "\n{} Exported {} tracker domains and {} entities to {}",
            "✓".green(),
            report.domains,
            report.entities,
            config.output_dir.display().to_string().bright_white()
        );
    }
    Ok(())
}

pub fn handle_import(sub_matches: &ArgMatches) -> Result<()> {
    let quiet = sub_matches.get_flag("quiet");
    init_tracing(OutputMode::from_flags(quiet, false));

    let dir = sub_matches
        .get_one::<String>("DIR")
        .context("missing crawl directory")?;
    let database = sub_matches
        .get_one::<String>("database")
        .context("missing --database")?;
    let crawl_id = sub_matches
        .get_one::<String>("crawl-id")
        .context("missing --crawl-id")?;
    let region = sub_matches.get_one::<String>("region").map(String::as_str);

    let database = expand_path(database);
    let imported = import_crawl(&expand_path(dir), &database, crawl_id, region)?;

    if !quiet {
        println!(
            "{} Imported {} sites into {} (crawl {})",
            "✓".green(),
            imported,
            database.display().to_string().bright_white(),
            crawl_id
        );
    }
    Ok(())
}
