use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser};
use log::{error, info};
use simplelog::{Config, LevelFilter, WriteLogger};

use dviview::dvi::session::DviSession;
use dviview::notification::{NotificationLevel, NotificationManager};
use dviview::panic_handler;
use dviview::settings;

/// Render a page of a TeX DVI file to PNG
#[derive(Parser, Debug)]
#[command(name = "dviview", version, about)]
struct Args {
    /// DVI file to open
    file: PathBuf,

    /// Page to render (1-based)
    #[arg(short, long, default_value_t = 1)]
    page: usize,

    /// Jump to a `src:<line><file>` reference or a `#anchor` instead of --page
    #[arg(short, long)]
    reference: Option<String>,

    /// Display resolution, overrides the settings file
    #[arg(short, long)]
    dpi: Option<f64>,

    /// Output PNG; defaults to <file>-<page>.png next to the DVI file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Draw glyphs with binary masks instead of alpha blending
    #[arg(long)]
    no_alpha: bool,

    /// Print the text found on the page
    #[arg(long)]
    text: bool,

    /// Print the fonts of the document and where they were found
    #[arg(long)]
    fonts: bool,

    #[arg(long, default_value = "dviview.log")]
    log_file: PathBuf,

    /// More detailed log, repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    WriteLogger::init(
        level,
        Config::default(),
        File::create(&args.log_file)
            .with_context(|| format!("cannot create log file {}", args.log_file.display()))?,
    )?;
    panic_handler::initialize_panic_handler();

    info!("Starting dviview on {}", args.file.display());
    settings::load_settings();
    let mut settings = settings::current();
    if let Some(dpi) = args.dpi {
        settings.display_dpi = dpi;
    }
    if args.no_alpha {
        settings.alpha_blending = false;
    }

    let result = run(&args, &settings);
    if let Err(e) = &result {
        error!("{e:#}");
    }
    info!("Shutting down dviview");
    result
}

fn run(args: &Args, settings: &settings::Settings) -> Result<()> {
    let mut session = DviSession::from_settings(settings);
    let mut notes = NotificationManager::new();
    let opened = session.open(&args.file, &mut notes);
    report(&notes);
    opened.with_context(|| format!("cannot load {}", args.file.display()))?;

    let page = match &args.reference {
        Some(reference) => match session.parse_reference(reference) {
            Some(anchor) => anchor.page,
            None => bail!("reference {reference:?} not found in the document"),
        },
        None => args.page.saturating_sub(1),
    };
    if page >= session.total_pages() {
        bail!(
            "page {} does not exist, the document has {} pages",
            page + 1,
            session.total_pages()
        );
    }
    session.go_to_page(page);

    if args.fonts {
        for font in session.font_status() {
            let file = font
                .filename
                .as_deref()
                .map_or_else(|| "not found".to_string(), |p| p.display().to_string());
            let kind = font.kind.map_or_else(|| "-".to_string(), |k| format!("{k:?}"));
            println!("{:<16} {:>4}% {kind:<8} {file}", font.name, font.enlargement_percent);
            if let Some(error) = font.error {
                println!("{:<16} error: {error}", "");
            }
        }
    }

    let rendered = session.render_page(session.current_page())?;
    for warning in &rendered.warnings {
        eprintln!("warning: {warning}");
    }
    if args.text {
        println!("{}", rendered.content.text());
    }

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&args.file, page));
    rendered
        .image
        .save_with_format(&output, image::ImageFormat::Png)
        .with_context(|| format!("cannot write {}", output.display()))?;
    println!(
        "page {} of {} written to {} ({}x{} at {} dpi)",
        page + 1,
        session.total_pages(),
        output.display(),
        rendered.image.width(),
        rendered.image.height(),
        rendered.dpi
    );
    Ok(())
}

fn default_output(file: &Path, page: usize) -> PathBuf {
    let stem = file
        .file_stem()
        .map_or_else(|| "page".into(), |s| s.to_string_lossy().into_owned());
    file.with_file_name(format!("{stem}-{}.png", page + 1))
}

fn report(notes: &NotificationManager) {
    for note in notes.all().iter().rev() {
        match note.level {
            NotificationLevel::Status => {}
            NotificationLevel::Warning => eprintln!("warning: {}", note.message),
            NotificationLevel::Error => eprintln!("error: {}", note.message),
        }
    }
}
