use clap::Parser;

use strategist::cli::commands::ops::OpsCommand;
use strategist::cli::commands::queue::QueueCommand;
use strategist::cli::{Cli, Commands};
use strategist::domain::models::{OperationState, Tier};

#[test]
fn test_parse_analyze_existing_session() {
    let cli = Cli::try_parse_from(["strategist", "analyze", "--session", "sess_42", "--wait"]).unwrap();

    match cli.command {
        Commands::Analyze(args) => {
            assert_eq!(args.session.as_deref(), Some("sess_42"));
            assert!(args.wait);
            assert!(args.tier.is_none());
        }
        _ => panic!("Wrong top-level command"),
    }
    assert!(!cli.json);
}

#[test]
fn test_parse_analyze_new_session() {
    let cli = Cli::try_parse_from([
        "strategist",
        "--json",
        "analyze",
        "--tier",
        "syndicate",
        "--problem",
        "Trial users never invite teammates",
        "--email",
        "founder@example.com",
    ])
    .unwrap();

    assert!(cli.json);
    match cli.command {
        Commands::Analyze(args) => {
            assert_eq!(args.tier, Some(Tier::Full));
            assert_eq!(
                args.problem.as_deref(),
                Some("Trial users never invite teammates")
            );
            assert_eq!(args.email.as_deref(), Some("founder@example.com"));
            assert!(!args.wait);
        }
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_analyze_rejects_session_with_tier() {
    let result = Cli::try_parse_from([
        "strategist",
        "analyze",
        "--session",
        "sess_42",
        "--tier",
        "standard",
        "--problem",
        "x",
    ]);
    assert!(result.is_err());

    // --tier needs a problem statement to create a session.
    assert!(Cli::try_parse_from(["strategist", "analyze", "--tier", "medium"]).is_err());
    assert!(Cli::try_parse_from(["strategist", "analyze", "--tier", "platinum", "--problem", "x"]).is_err());
}

#[test]
fn test_parse_ops_list_filters() {
    let cli = Cli::try_parse_from([
        "strategist",
        "ops",
        "list",
        "--state",
        "failed",
        "--tier",
        "full",
        "--limit",
        "5",
    ])
    .unwrap();

    match cli.command {
        Commands::Ops(ops) => match ops.command {
            OpsCommand::List {
                state,
                session,
                tier,
                limit,
            } => {
                assert_eq!(state, Some(OperationState::Failed));
                assert!(session.is_none());
                assert_eq!(tier, Some(Tier::Full));
                assert_eq!(limit, 5);
            }
            _ => panic!("Wrong ops command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_admin_action_requires_actor() {
    let cli = Cli::try_parse_from([
        "strategist",
        "ops",
        "pause",
        "op_123",
        "--actor",
        "0xadmin",
        "--notes",
        "waiting on provider",
    ])
    .unwrap();

    match cli.command {
        Commands::Ops(ops) => match ops.command {
            OpsCommand::Pause(action) => {
                assert_eq!(action.operation_id, "op_123");
                assert_eq!(action.actor, "0xadmin");
                assert_eq!(action.notes.as_deref(), Some("waiting on provider"));
            }
            _ => panic!("Wrong ops command"),
        },
        _ => panic!("Wrong top-level command"),
    }

    assert!(Cli::try_parse_from(["strategist", "ops", "cancel", "op_123"]).is_err());
}

#[test]
fn test_parse_worker_and_queue() {
    let cli = Cli::try_parse_from(["strategist", "worker", "--once", "--interval", "15"]).unwrap();
    match cli.command {
        Commands::Worker(args) => {
            assert!(args.once);
            assert_eq!(args.interval, Some(15));
        }
        _ => panic!("Wrong top-level command"),
    }

    let cli = Cli::try_parse_from(["strategist", "queue", "stats", "--json"]).unwrap();
    assert!(cli.json);
    match cli.command {
        Commands::Queue(args) => assert!(matches!(args.command, QueueCommand::Stats)),
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_init_defaults() {
    let cli = Cli::try_parse_from(["strategist", "init"]).unwrap();
    match cli.command {
        Commands::Init(args) => {
            assert!(!args.force);
            assert_eq!(args.path, std::path::PathBuf::from("."));
        }
        _ => panic!("Wrong top-level command"),
    }
}
