use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use console::Term;
use indicatif::MultiProgress;
use parget_fetch::{ByteSize, FetchError, HttpSource, Mailboxes, Manager, View, format_duration};
use tokio_util::sync::CancellationToken;

use crate::cli::{App, Commands, GetArg};
use crate::prompt::confirm;
use crate::render::Renderer;

mod cli;
mod logging;
mod prompt;
mod render;

#[tokio::main]
async fn main() -> ExitCode {
    let app = App::parse();
    let multi = MultiProgress::new();
    logging::init(app.verbose, &multi);

    match run(app, multi).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<FetchError>() {
                Some(err) => eprintln!("error ({:?}): {err}", err.kind()),
                None => eprintln!("error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(app: App, multi: MultiProgress) -> Result<()> {
    match app.cmd {
        Commands::Get(arg) => get(arg, multi).await,
    }
}

async fn get(arg: GetArg, multi: MultiProgress) -> Result<()> {
    let conf = Arc::new(arg.configure(|key| std::env::var(key).ok())?);
    let term = Term::stdout();
    term.write_line("Configure {")?;
    term.write_str(&conf.summary())?;
    term.write_line("}")?;

    if !arg.yes && !confirm(&term, "Are you sure you want to start downloading")? {
        return Ok(());
    }
    if conf.exists()? && !arg.yes {
        term.write_line(&format!("File already exists: {}", conf.output().display()))?;
        if !confirm(&term, "Are you sure you want to overwrite the existing file")? {
            return Ok(());
        }
    }

    let (view, inbox) = Mailboxes::new();
    let manager = Manager::new(
        Arc::clone(&conf),
        HttpSource::new(Arc::clone(&conf)),
        Arc::new(view) as Arc<dyn View>,
    );
    let cancel = CancellationToken::new();
    let done = CancellationToken::new();
    tokio::spawn(interrupt(cancel.clone()));
    let renderer = tokio::spawn(Renderer::new(multi).run(
        inbox,
        manager.controller(),
        cancel.clone(),
        done.clone(),
    ));

    let result = manager.serve(cancel).await;
    done.cancel();
    renderer.await?;

    let report = result?;
    term.write_line(&format!(
        "success: {} {} in {}{}",
        report.output.display(),
        ByteSize(report.size),
        format_duration(report.elapsed),
        if report.resumed { " (resumed)" } else { "" },
    ))?;
    Ok(())
}

async fn interrupt(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::signal::ctrl_c() => match res {
            Ok(()) => {
                tracing::warn!("interrupted, stopping workers");
                cancel.cancel();
            }
            Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
        },
    }
}
