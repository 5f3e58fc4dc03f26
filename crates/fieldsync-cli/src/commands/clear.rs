use crate::commands::common::CliContext;
use crate::error::CliError;

pub async fn run_clear_synced(context: &CliContext) -> Result<(), CliError> {
    let store = context.open_store()?;
    let removed = store.remove_all_synced().await?;
    println!("Removed {removed} synced submission(s)");
    Ok(())
}
