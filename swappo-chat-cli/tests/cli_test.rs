use std::process::{Command, Output};

fn run_swappo_chat(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_swappo-chat"))
        .args(args)
        .env("DATABASE_URL", "postgres://localhost/swappo_chat_test")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute swappo-chat")
}

fn output_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_to_string(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

mod version_command_tests {
    use super::*;

    #[test]
    fn test_version_command_basic() {
        let output = run_swappo_chat(&["version"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success(), "version command should succeed");
        assert!(stdout.contains("swappo-chat"));
        assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_version_command_detailed() {
        let output = run_swappo_chat(&["version", "--detailed"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        assert!(stdout.contains("Version Information"));
        assert!(stdout.contains("Build Information"));
    }
}

mod help_tests {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let output = run_swappo_chat(&["--help"]);
        let stdout = output_to_string(&output);

        assert!(output.status.success());
        for command in ["init", "rooms", "messages", "unread", "stats", "worker"] {
            assert!(stdout.contains(command), "help should mention '{}'", command);
        }
    }

    #[test]
    fn test_unknown_command_fails() {
        let output = run_swappo_chat(&["teleport"]);
        assert!(!output.status.success());
    }
}

mod memory_store_tests {
    use super::*;

    #[test]
    fn test_create_room_json() {
        let output = run_swappo_chat(&[
            "--memory", "rooms", "create", "42", "user_abc", "user_xyz", "--format", "json",
        ]);
        assert!(output.status.success(), "{}", stderr_to_string(&output));

        let room: serde_json::Value =
            serde_json::from_str(&output_to_string(&output)).expect("room should be JSON");
        assert_eq!(room["trade_offer_id"], 42);
        assert_eq!(room["user1_id"], "user_abc");
        assert_eq!(room["user2_id"], "user_xyz");
        assert_eq!(room["is_active"], true);
    }

    #[test]
    fn test_create_room_rejects_same_participant() {
        let output = run_swappo_chat(&["--memory", "rooms", "create", "7", "user_abc", "user_abc"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("distinct participants"));
    }

    #[test]
    fn test_send_to_unknown_room_fails() {
        let output = run_swappo_chat(&[
            "--memory",
            "messages",
            "send",
            "00000000-0000-0000-0000-000000000001",
            "user_abc",
            "hello",
        ]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("E3001"));
    }

    #[test]
    fn test_invalid_room_id_fails() {
        let output = run_swappo_chat(&["--memory", "rooms", "show", "not-a-uuid"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("Invalid room ID"));
    }

    #[test]
    fn test_stats_on_empty_store() {
        let output = run_swappo_chat(&["--memory", "stats", "--format", "json"]);
        assert!(output.status.success(), "{}", stderr_to_string(&output));

        let stats: serde_json::Value = serde_json::from_str(&output_to_string(&output)).unwrap();
        assert_eq!(stats["total_rooms"], 0);
        assert_eq!(stats["pending_notifications"], 0);
    }

    #[test]
    fn test_init_rejects_memory_mode() {
        let output = run_swappo_chat(&["--memory", "init"]);

        assert!(!output.status.success());
        assert!(stderr_to_string(&output).contains("PostgreSQL"));
    }
}
