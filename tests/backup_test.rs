//! End-to-end backup of a frame written through views

use slicedb::ctl::{BackupCommand, BackupHeader, FragmentRecord};
use slicedb::error::Result;
use slicedb::{View, SLICE_WIDTH, VIEW_INVERSE, VIEW_STANDARD};

#[tokio::test]
async fn test_backup_frame_to_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let views_dir = dir.path().join("d").join("f").join("views");

    {
        let standard: View = View::new(views_dir.join(VIEW_STANDARD), "d", "f", VIEW_STANDARD);
        standard.open()?;
        standard.set_bit(2, 1)?;
        standard.set_bit(2, 3 * SLICE_WIDTH)?;
        standard.close()?;

        let inverse: View = View::new(views_dir.join(VIEW_INVERSE), "d", "f", VIEW_INVERSE);
        inverse.open()?;
        inverse.set_bit(1, 2)?;
        inverse.close()?;
    }
    // A view that was never opened has no fragments directory.
    let empty_view = views_dir.join("inverse_empty");
    std::fs::create_dir_all(&empty_view)?;

    let output = dir.path().join("backup.jsonl");
    let mut cmd = BackupCommand::new(dir.path());
    cmd.host = "node0:15000".to_string();
    cmd.database = "d".to_string();
    cmd.frame = "f".to_string();
    cmd.path = Some(output.clone());
    cmd.run().await?;

    let text = std::fs::read_to_string(&output)?;
    let mut lines = text.lines();

    let header: BackupHeader = serde_json::from_str(lines.next().unwrap()).unwrap();
    assert_eq!(header.host, "node0:15000");
    assert_eq!(header.database, "d");
    assert_eq!(header.frame, "f");

    let records: Vec<FragmentRecord> = lines
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(
        records,
        vec![
            FragmentRecord {
                view: VIEW_INVERSE.to_string(),
                slice: 0,
                bits: vec![(1, 2)],
            },
            FragmentRecord {
                view: VIEW_STANDARD.to_string(),
                slice: 0,
                bits: vec![(2, 1)],
            },
            FragmentRecord {
                view: VIEW_STANDARD.to_string(),
                slice: 3,
                bits: vec![(2, 3 * SLICE_WIDTH)],
            },
        ]
    );
    assert!(!empty_view.join("fragments").exists());
    Ok(())
}
