use anyhow::Result;
use console::style;
use tracing::info;

use crate::cli::{print_event, Session};

pub async fn ask(session: &Session, prompt: &str) -> Result<()> {
    info!("Resolving: {}", prompt);

    let store = session.open_store()?;
    let agent = session.agent(Some(store), Box::new(print_event))?;
    let answer = agent.resolve(prompt).await?;

    println!("{} {}", style("🤖").bold(), answer);
    Ok(())
}
