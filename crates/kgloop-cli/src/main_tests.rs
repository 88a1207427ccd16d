//! CLI tests

use super::*;
use clap::CommandFactory;

#[test]
fn test_cli_definition_is_valid() {
    Cli::command().debug_assert();
}

#[test]
fn test_apply_flags() {
    let cli = Cli::try_parse_from([
        "kgloop",
        "--playbook",
        "/tmp/pb",
        "apply",
        "--changeset",
        "c.json",
        "--dry-run",
        "--no-auto-apply",
    ])
    .unwrap();

    assert_eq!(cli.playbook, Some(PathBuf::from("/tmp/pb")));
    match cli.command {
        Commands::Apply {
            changeset,
            dry_run,
            no_auto_apply,
        } => {
            assert_eq!(changeset, PathBuf::from("c.json"));
            assert!(dry_run);
            assert!(no_auto_apply);
        }
        _ => panic!("expected apply"),
    }
}

#[test]
fn test_global_format_after_subcommand() {
    let cli = Cli::try_parse_from(["kgloop", "status", "--format", "json"]).unwrap();
    assert!(cli.format == OutputFormat::Json);
}

#[test]
fn test_approve_requires_ids() {
    assert!(Cli::try_parse_from(["kgloop", "approve", "--changeset", "c.json"]).is_err());

    let cli = Cli::try_parse_from(["kgloop", "approve", "-c", "c.json", "change_001", "change_002"]).unwrap();
    match cli.command {
        Commands::Approve { ids, .. } => assert_eq!(ids, vec!["change_001", "change_002"]),
        _ => panic!("expected approve"),
    }
}

#[test]
fn test_read_relationships_accepts_both_shapes() {
    let temp = tempfile::TempDir::new().unwrap();
    let bare = temp.path().join("bare.json");
    let wrapped = temp.path().join("wrapped.json");
    fs::write(&bare, r#"[{"source": "a", "relationship": "b", "target": "c"}]"#).unwrap();
    fs::write(
        &wrapped,
        r#"{"metadata": {}, "relationships": [{"source": "a", "predicate": "b", "target": "c"}]}"#,
    )
    .unwrap();

    assert_eq!(read_relationships(&bare).unwrap(), read_relationships(&wrapped).unwrap());

    let missing = temp.path().join("none.json");
    fs::write(&missing, r#"{"items": []}"#).unwrap();
    assert!(read_relationships(&missing).is_err());
}
