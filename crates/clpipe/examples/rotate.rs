//! Rotates a ramp image on the device under a resource tracker, compares it
//! with the host reference and dumps the create/release ledger as CSV.

use clpipe::{
    rotate::{format_rows, rotate_host, rotate_pipeline},
    Angle, ClError, ResourceTracker,
};

fn main() -> Result<(), ClError> {
    let (w, h) = (6, 6);
    let src: Vec<i32> = (0..(w * h) as i32).collect();
    let angle = Angle::from_degrees(90.0);

    let tracker = ResourceTracker::new();
    let out = rotate_pipeline(&src, w, h, angle)?
        .tracker(tracker.clone())
        .run()?
        .read::<i32>(1)?;

    print!("{}", format_rows(&out, w));
    let host = rotate_host(&src, w, h, angle)?;
    println!("host match: {}", out == host);

    tracker.assert_balanced()?;
    tracker
        .write_csv(std::io::stdout().lock())
        .map_err(|e| ClError::Tracker(e.to_string()))?;
    Ok(())
}
