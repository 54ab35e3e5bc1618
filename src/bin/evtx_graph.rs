use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use log::{LevelFilter, info};
use serde::Serialize;
use serde_json::json;

use evtx_graph::{
    BackendConfig, CollectionMap, CollectionRef, ElasticsearchBackend, StreamSettings,
    get_view, list_views, normalize, normalize_record, stream_events,
};

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Raw hits, one per line.
    Stream,
    /// Hits passed through the normalizer.
    Events,
}

struct EvtxGraph {
    output: Box<dyn Write>,
    indent: bool,
    /// Set when a record failed but the run carried on.
    had_errors: bool,
}

impl EvtxGraph {
    fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let output: Box<dyn Write> = match matches.get_one::<String>("output-target") {
            Some(path) => {
                let f = create_output_file(path, !matches.get_flag("no-confirm-overwrite"))
                    .with_context(|| format!("failed to create output file at `{}`", path))?;
                Box::new(BufWriter::new(f))
            }
            None => Box::new(io::stdout()),
        };

        Ok(EvtxGraph {
            output,
            indent: !matches.get_flag("no-indent"),
            had_errors: false,
        })
    }

    fn write_json<T: Serialize>(&mut self, value: &T) -> Result<()> {
        if self.indent {
            serde_json::to_writer_pretty(&mut self.output, value)?;
        } else {
            serde_json::to_writer(&mut self.output, value)?;
        }
        writeln!(self.output)?;
        Ok(())
    }

    fn run_stream(&mut self, matches: &ArgMatches, mode: Mode) -> Result<()> {
        let collections_path = matches
            .get_one::<PathBuf>("collections")
            .context("--collections is required")?;
        let collections = CollectionMap::from_path(collections_path).with_context(|| {
            format!(
                "failed to load collections from `{}`",
                collections_path.display()
            )
        })?;

        let collection = matches
            .get_one::<String>("COLLECTION")
            .map(|c| CollectionRef::new(c.as_str()))
            .context("a collection is required")?;
        let query = matches
            .get_one::<String>("QUERY")
            .map(String::as_str)
            .unwrap_or("*");

        let config = backend_config(matches);
        let settings = stream_settings(matches);
        let backend = ElasticsearchBackend::new(&config)?;

        info!("Connecting to {}", config.base_url());
        let stream = stream_events(&collections, backend, &collection, query, &settings)?;

        for record in stream {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.kind() == evtx_graph::ErrorKind::Backend => {
                    return Err(e).context("stream aborted");
                }
                Err(e) => {
                    self.report(&e);
                    continue;
                }
            };

            match mode {
                Mode::Stream => self.write_json(&record)?,
                Mode::Events => match normalize_record(&record) {
                    Ok(event) => {
                        let line = json!({
                            "_id": record.id,
                            "_index": record.index,
                            "timestamp": record.timestamp().map(|t| t.to_string()),
                            "event": event,
                        });
                        self.write_json(&line)?;
                    }
                    Err(e) => self.report(&e),
                },
            }
        }

        Ok(())
    }

    fn run_normalize(&mut self, matches: &ArgMatches) -> Result<()> {
        let input = matches
            .get_one::<String>("INPUT")
            .context("an input is required")?;

        let mut xml = String::new();
        if input == "-" {
            io::stdin()
                .read_to_string(&mut xml)
                .context("failed to read stdin")?;
        } else {
            File::open(input)
                .and_then(|mut f| f.read_to_string(&mut xml))
                .with_context(|| format!("failed to read `{}`", input))?;
        }

        let event = normalize(&xml).with_context(|| format!("failed to normalize `{}`", input))?;
        self.write_json(&event)
    }

    fn run(&mut self, matches: &ArgMatches) -> Result<()> {
        match matches.subcommand() {
            Some(("stream", sub)) => self.run_stream(sub, Mode::Stream)?,
            Some(("events", sub)) => self.run_stream(sub, Mode::Events)?,
            Some(("normalize", sub)) => self.run_normalize(sub)?,
            Some(("views", _)) => {
                let views = list_views();
                self.write_json(&views)?
            }
            Some(("view", sub)) => {
                let id = *sub.get_one::<usize>("ID").context("a view id is required")?;
                let view = get_view(id)?;
                self.write_json(&view)?
            }
            _ => bail!("unknown command"),
        }

        self.output.flush()?;
        Ok(())
    }

    fn report(&mut self, e: &evtx_graph::EvtxGraphError) {
        self.had_errors = true;
        eprintln!("{}", e);
    }
}

fn backend_config(matches: &ArgMatches) -> BackendConfig {
    let mut config = BackendConfig::from_env();
    if let Some(host) = matches.get_one::<String>("host") {
        config = config.host(host.as_str());
    }
    if let Some(port) = matches.get_one::<u16>("port") {
        config = config.port(*port);
    }
    config
}

fn stream_settings(matches: &ArgMatches) -> StreamSettings {
    let mut settings = StreamSettings::new();
    if let Some(page_size) = matches.get_one::<usize>("page-size") {
        settings = settings.page_size(*page_size);
    }
    if let Some(limit) = matches.get_one::<usize>("limit") {
        settings = settings.limit(if *limit == 0 { None } else { Some(*limit) });
    }
    if let Some(seconds) = matches.get_one::<u64>("keep-alive") {
        settings = settings.keep_alive(Duration::from_secs(*seconds));
    }
    settings
}

/// If `prompt` is passed, will display a confirmation prompt before overwriting files.
fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
    let p = path.as_ref();

    if p.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            p.display()
        );
    }

    if p.exists() && prompt {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to override output file at {}",
                p.display()
            ))
            .default(false)
            .interact()
            .context("failed to display confirmation prompt")?;

        if !confirmed {
            bail!("Cancelled");
        }
    }

    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    Ok(File::create(p)?)
}

fn try_to_initialize_logging(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3 => LevelFilter::Trace,
        _ => {
            eprintln!("using more than -vvv does not affect verbosity level");
            LevelFilter::Trace
        }
    };

    if let Err(e) = simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logging: {}", e);
    }
}

fn search_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("COLLECTION")
            .required(true)
            .help("Collection to read, as named in the collections file"),
    )
    .arg(
        Arg::new("QUERY")
            .default_value("*")
            .help("Query string, defaults to every record"),
    )
    .arg(
        Arg::new("collections")
            .long("collections")
            .short('c')
            .required(true)
            .value_name("FILE")
            .value_parser(clap::value_parser!(PathBuf))
            .help("JSON file mapping collections to index names, e.g. {\"1\": [\"timeline-a\"]}"),
    )
    .arg(
        Arg::new("host")
            .long("host")
            .help("Search service host [default: $ELASTIC_HOST or 127.0.0.1]"),
    )
    .arg(
        Arg::new("port")
            .long("port")
            .value_parser(clap::value_parser!(u16))
            .help("Search service port [default: $ELASTIC_PORT or 9200]"),
    )
    .arg(
        Arg::new("page-size")
            .long("page-size")
            .default_value("500")
            .value_parser(clap::value_parser!(usize))
            .help("Records fetched per round trip"),
    )
    .arg(
        Arg::new("limit")
            .long("limit")
            .default_value("10000")
            .value_parser(clap::value_parser!(usize))
            .help("Maximum number of records to stream, 0 for no limit"),
    )
    .arg(
        Arg::new("keep-alive")
            .long("keep-alive")
            .default_value("60")
            .value_parser(clap::value_parser!(u64))
            .help("Seconds the search cursor is kept open between pages"),
    )
}

fn cli() -> Command {
    Command::new("evtx_graph")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Stream Windows event records from a search index and normalize them")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .global(true)
                .value_name("FILE")
                .help(indoc!("
                    Writes output to the file specified instead of stdout, errors will still be printed to stderr.
                    Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`.
                    Will create parent directories if needed.")),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("no-indent")
                .long("no-indent")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("When set, output will not be indented."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace."),
        )
        .subcommand(search_args(
            Command::new("stream").about("Print the raw search hits of a query, one JSON document per hit"),
        ))
        .subcommand(search_args(
            Command::new("events").about("Print the normalized events of a query"),
        ))
        .subcommand(
            Command::new("normalize")
                .about("Normalize a single event XML document")
                .arg(
                    Arg::new("INPUT")
                        .required(true)
                        .help("XML file to read, `-` for stdin"),
                ),
        )
        .subcommand(Command::new("views").about("List the predefined graph views"))
        .subcommand(
            Command::new("view").about("Show one graph view").arg(
                Arg::new("ID")
                    .required(true)
                    .value_parser(clap::value_parser!(usize)),
            ),
        )
}

fn main() {
    let matches = cli().get_matches();

    // Global flags are visible on the subcommand matches regardless of where they were passed.
    let sub = matches.subcommand().map(|(_, m)| m).unwrap_or(&matches);
    try_to_initialize_logging(sub.get_count("verbose"));

    let mut app = match EvtxGraph::from_cli_matches(sub) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("{:?}", e);
            exit(1)
        }
    };

    if let Err(e) = app.run(&matches) {
        eprintln!("{:?}", e);
        exit(1)
    }

    if app.had_errors {
        exit(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        cli().debug_assert();
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let matches = cli()
            .try_get_matches_from([
                "evtx_graph",
                "stream",
                "1",
                "--collections",
                "c.json",
                "--limit",
                "0",
                "--page-size",
                "50",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        let settings = stream_settings(sub);

        assert_eq!(settings.get_limit(), None);
        assert_eq!(settings.get_page_size(), 50);
        assert_eq!(settings.get_keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_flags_override_connection_settings() {
        let matches = cli()
            .try_get_matches_from([
                "evtx_graph",
                "events",
                "1",
                "--collections",
                "c.json",
                "--host",
                "search.internal",
                "--port",
                "9243",
            ])
            .unwrap();
        let (_, sub) = matches.subcommand().unwrap();

        assert_eq!(
            backend_config(sub).base_url(),
            "http://search.internal:9243"
        );
    }
}
