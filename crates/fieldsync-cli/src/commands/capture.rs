use fieldsync_core::models::{GpsCoordinates, PhotoRef};
use fieldsync_core::SubmissionPayload;

use crate::cli::CaptureArgs;
use crate::commands::common::{resolve_photo_paths, CliContext};
use crate::error::CliError;

pub async fn run_capture(args: CaptureArgs, context: &CliContext) -> Result<(), CliError> {
    let photos = resolve_photo_paths(&args.photos)?
        .iter()
        .map(|path| PhotoRef::new(path.to_string_lossy()))
        .collect::<Result<Vec<_>, _>>()?;
    let payload = build_payload(args);

    let store = context.open_store()?;
    let local_id = store.enqueue(payload, photos).await?;

    println!("{local_id}");
    Ok(())
}

pub fn build_payload(args: CaptureArgs) -> SubmissionPayload {
    let mut payload = SubmissionPayload::new(args.rego, args.offence, args.location);
    if let Some(licence) = args.licence {
        payload = payload.with_driver_licence(licence);
    }
    if let (Some(latitude), Some(longitude)) = (args.lat, args.lon) {
        payload = payload.with_coordinates(GpsCoordinates {
            accuracy_m: args.accuracy,
            ..GpsCoordinates::new(latitude, longitude)
        });
    }
    if let Some(notes) = args.notes {
        payload = payload.with_notes(notes);
    }
    payload
}
