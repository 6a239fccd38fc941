use colored::Colorize;
use trackmap::commands::command_argument_builder;
use trackmap::handlers::{handle_import, handle_process};

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();

    let result = match chosen_command.subcommand() {
        Some(("process", primary_command)) => handle_process(primary_command).await,
        Some(("import", primary_command)) => handle_import(primary_command),
        _ => unreachable!("clap should ensure we don't get here"),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red(), e);
        std::process::exit(1);
    }
}
