use crate::commands::common::{
    format_submission_lines, print_json, submission_to_list_item, CliContext, SubmissionListItem,
};
use crate::error::CliError;

pub async fn run_list(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let store = context.open_store()?;
    let submissions = store.list().await?;

    if as_json {
        let json_items = submissions
            .iter()
            .map(submission_to_list_item)
            .collect::<Vec<SubmissionListItem>>();
        return print_json(&json_items);
    }

    if submissions.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    for line in format_submission_lines(&submissions) {
        println!("{line}");
    }
    Ok(())
}
