use crate::CLAP_STYLING;
use clap::{arg, command};

pub fn command_argument_builder() -> clap::Command {
    clap::Command::new("trackmap")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("trackmap")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress the progress bar and non-essential output")
                .required(false)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            command!("process")
                .about(
                    "Classify every site of a crawl and aggregate the third-party requests into \
                per-tracker profiles.",
                )
                .arg(
                    arg!(-c --"config" <PATH>)
                        .required(false)
                        .help("JSON config file. Command-line options override its values"),
                )
                .arg(
                    arg!(-d --"data" <PATH>)
                        .required(false)
                        .help("Directory of crawl JSON files, or 'sqlite' to read the crawl store"),
                )
                .arg(
                    arg!(--"database" <PATH>)
                        .required(false)
                        .help("SQLite crawl store used with --data sqlite"),
                )
                .arg(
                    arg!(--"crawl-id" <ID>)
                        .required(false)
                        .help("Crawl identifier to read from the crawl store"),
                )
                .arg(
                    arg!(-r --"region" <CODE>)
                        .required(false)
                        .help("Region code. Filters the crawl store and suffixes the source tag"),
                )
                .arg(
                    arg!(-p --"parallelism" <N>)
                        .required(false)
                        .help("Number of sites processed concurrently (default: 10)")
                        .value_parser(clap::value_parser!(usize)),
                )
                .arg(
                    arg!(--"psl-extras" <PATH>)
                        .required(false)
                        .help("Private suffix override file ({\"privatePSL\": [...]})"),
                )
                .arg(
                    arg!(--"reference" <DIR>)
                        .required(false)
                        .help("Directory holding the reference data tables"),
                )
                .arg(
                    arg!(-o --"output" <DIR>)
                        .required(false)
                        .help("Export directory (default: ./output)"),
                )
                .arg(
                    arg!(--"source-tag" <TAG>)
                        .required(false)
                        .help("Provider tag written to every tracker record"),
                )
                .arg(
                    arg!(--"add-surrogates")
                        .required(false)
                        .help("Attach surrogate rules to tracker records"),
                )
                .arg(
                    arg!(-v --"verbose")
                        .required(false)
                        .help("Print every site as it finishes instead of a progress bar")
                        .conflicts_with("quiet"),
                ),
        )
        .subcommand(
            command!("import")
                .about("Load a directory of crawl JSON files into the SQLite crawl store")
                .arg(
                    arg!(<DIR>)
                        .required(true)
                        .help("Directory of crawl JSON files"),
                )
                .arg(
                    arg!(--"database" <PATH>)
                        .required(true)
                        .help("SQLite crawl store to create or extend"),
                )
                .arg(
                    arg!(--"crawl-id" <ID>)
                        .required(true)
                        .help("Identifier stored with every imported site"),
                )
                .arg(
                    arg!(-r --"region" <CODE>)
                        .required(false)
                        .help("Region code stored with every imported site"),
                ),
        )
}
