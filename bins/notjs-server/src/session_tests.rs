/// Scenario tests for the session lifecycle
///
/// These drive a SessionManager through its channel events the way the
/// WebSocket adapter does, with fake compiler scripts standing in for the
/// real toolchains:
/// 1. A program that exits on its own streams nothing and leaves no files
/// 2. A compile failure streams the diagnostic and never accepts input
/// 3. An unknown language is rejected before anything is written
/// 4. The first message is always the execution request
/// 5. Disconnects and shutdown tear running programs down, even when the
///    program ignores its stdin or floods a client that is not reading

#[cfg(test)]
mod session_scenarios {
    use crate::executor::test_support::{context, descriptor, fake_registry, write_script, FAKE_COMPILER};
    use crate::executor::ExecutorSet;
    use crate::session::{CloseKind, Outbound, Session, SessionManager, SessionState, OUTBOUND_QUEUE};
    use notjs_common::ToolchainRegistry;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const MAX_SOURCE: usize = 64 * 1024;

    struct Harness {
        _tmp: TempDir,
        scratch: PathBuf,
        manager: SessionManager,
    }

    fn harness_with(registry: ToolchainRegistry, tmp: TempDir) -> Harness {
        let executors = ExecutorSet::from_registry(&registry, context(tmp.path())).unwrap();
        let manager = SessionManager::new(Arc::new(registry), Arc::new(executors), MAX_SOURCE);
        Harness {
            scratch: tmp.path().join("scratch"),
            _tmp: tmp,
            manager,
        }
    }

    fn harness() -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let registry = fake_registry(tmp.path());
        harness_with(registry, tmp)
    }

    /// Every C program runs behind `sh -c <script>` instead of the binary
    fn harness_with_launcher(script: &str) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let compiler = write_script(tmp.path(), "fakecc", FAKE_COMPILER);
        let mut c = descriptor("c", &compiler, "17", &["17"]);
        c.launcher = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        let registry = ToolchainRegistry::from_descriptors(vec![c]).unwrap();
        harness_with(registry, tmp)
    }

    fn connect(manager: &SessionManager) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        (manager.open(tx), rx)
    }

    fn request(language: &str, code: &str, version: Option<&str>) -> String {
        serde_json::json!({
            "language": language,
            "code": code,
            "version": version,
            "arguments": [],
        })
        .to_string()
    }

    /// Collect text until the channel is closed by the server
    async fn read_until_close(rx: &mut mpsc::Receiver<Outbound>) -> (String, CloseKind) {
        let mut text = String::new();
        let deadline = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(message) = rx.recv().await {
                match message {
                    Outbound::Text(chunk) => text.push_str(&chunk),
                    Outbound::Close(kind) => return Some(kind),
                }
            }
            None
        })
        .await;

        match deadline {
            Ok(Some(kind)) => (text, kind),
            Ok(None) => panic!("channel dropped without close; got {:?}", text),
            Err(_) => panic!("no close within deadline; got {:?}", text),
        }
    }

    async fn wait_until_idle(manager: &SessionManager) {
        for _ in 0..250 {
            if manager.active_sessions() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} sessions still active", manager.active_sessions());
    }

    fn scratch_entries(scratch: &Path) -> usize {
        std::fs::read_dir(scratch).unwrap().count()
    }

    #[tokio::test]
    async fn test_program_runs_to_completion_and_cleans_up() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("c", "int main(){return 0;}", None))
            .await;
        assert_ne!(session.state(), SessionState::Uninitialized);

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Normal);
        assert!(!text.contains("Error"), "unexpected diagnostic: {:?}", text);

        wait_until_idle(&h.manager).await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.handle().unwrap().is_cleaned_up());
        assert_eq!(scratch_entries(&h.scratch), 0);

        // Client close after the fact is harmless
        h.manager.on_close(&session).await;
    }

    #[tokio::test]
    async fn test_compile_failure_streams_diagnostic() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("cpp", "invalid+++", Some("17")))
            .await;
        assert!(matches!(
            session.state(),
            SessionState::Draining | SessionState::Closed
        ));

        // Never forwarded: the compiler had no stdin and no error is reported
        h.manager.on_message(&session, "ignored input").await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Normal);
        assert!(text.contains("error: expected declaration"), "{:?}", text);
        assert!(text.contains("-std=c++17"), "{:?}", text);
        assert!(!text.contains("Error writing to process"), "{:?}", text);

        wait_until_idle(&h.manager).await;
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_unknown_language_rejected_without_writes() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("python", "print(1)", None))
            .await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Policy);
        assert!(text.starts_with("Error: Language 'python' is not supported"), "{:?}", text);
        assert!(text.ends_with("\r\n"));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.handle().is_none());
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_unsupported_version_rejected() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("go", "package main", Some("1.4")))
            .await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Policy);
        assert!(text.contains("Unsupported version '1.4' for language 'go'"), "{:?}", text);
        assert!(text.contains("1.21"));
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_first_message_is_the_request() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager.on_message(&session, "hello there").await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Policy);
        assert!(text.starts_with("Error: Invalid execution request"), "{:?}", text);
        assert_eq!(session.state(), SessionState::Closed);

        // A later valid request does not revive a closed session
        h.manager
            .on_message(&session, &request("c", "int main(){}", None))
            .await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_oversized_source_rejected() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        let code = "x".repeat(MAX_SOURCE + 1);
        h.manager.on_message(&session, &request("c", &code, None)).await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Policy);
        assert!(text.contains("exceeds maximum size"), "{:?}", text);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_start_failure_closes_with_server_error() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolchainRegistry::from_descriptors(vec![descriptor(
            "c",
            Path::new("/nonexistent/gcc"),
            "17",
            &["17"],
        )])
        .unwrap();
        let h = harness_with(registry, tmp);
        let (session, mut rx) = connect(&h.manager);

        h.manager.on_message(&session, &request("c", "int main(){}", None)).await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::ServerError);
        assert!(text.starts_with("Error: Failed to start execution"), "{:?}", text);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_input_forwarded_then_disconnect_tears_down() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("c", "int main(){scanf(\"%d\");}", None))
            .await;
        assert_eq!(session.state(), SessionState::Running);

        h.manager.on_message(&session, "42").await;

        let mut echoed = String::new();
        while !echoed.contains("42\n") {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(Outbound::Text(chunk))) => echoed.push_str(&chunk),
                other => panic!("expected echoed input, got {:?}", other),
            }
        }

        let handle = session.handle().unwrap();
        assert!(handle.is_alive());

        h.manager.on_close(&session).await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(!handle.is_alive());
        assert!(handle.is_cleaned_up());
        assert!(handle.artifacts().iter().all(|p| !p.exists()));
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_input_after_exit_reports_and_continues() {
        let h = harness();
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(&session, &request("rust", "fn main() {}", None))
            .await;
        let handle = session.handle().unwrap();
        handle.await_exit().await;

        // Either the session already closed, or the write fails on the dead pipe
        h.manager.on_message(&session, "too late").await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Normal);
        if !text.is_empty() {
            assert!(text.starts_with("Error writing to process"), "{:?}", text);
        }
        wait_until_idle(&h.manager).await;
    }

    #[tokio::test]
    async fn test_concurrent_java_sessions_do_not_collide() {
        let h = harness();
        let code = "public class Main { public static void main(String[] a) {} }";

        let (first, mut first_rx) = connect(&h.manager);
        let (second, mut second_rx) = connect(&h.manager);
        let first_req = request("java", code, Some("17"));
        let second_req = request("java", code, Some("17"));
        tokio::join!(
            h.manager.on_message(&first, &first_req),
            h.manager.on_message(&second, &second_req),
        );

        // The fake runtime echoes its command line, including the source path
        let (first_text, _) = read_until_close(&mut first_rx).await;
        let (second_text, _) = read_until_close(&mut second_rx).await;
        assert!(first_text.contains("_Main.java"), "{:?}", first_text);
        assert!(second_text.contains("_Main.java"), "{:?}", second_text);
        assert_ne!(first_text, second_text);

        wait_until_idle(&h.manager).await;
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_large_input_to_non_reading_program_does_not_block_close() {
        let h = harness_with_launcher("sleep 30");
        let (session, _rx) = connect(&h.manager);

        h.manager.on_message(&session, &request("c", "int main(){}", None)).await;
        assert_eq!(session.state(), SessionState::Running);
        let handle = session.handle().unwrap();

        // Far beyond the pipe buffer; the program never drains it
        let line = "x".repeat(256 * 1024);
        tokio::time::timeout(Duration::from_secs(3), h.manager.on_message(&session, &line))
            .await
            .expect("input must not block the receive loop");
        h.manager.on_message(&session, "more").await;

        tokio::time::timeout(Duration::from_secs(3), h.manager.on_close(&session))
            .await
            .expect("close must not wait on a stalled stdin write");
        assert!(!handle.is_alive());
        assert!(handle.is_cleaned_up());
        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(scratch_entries(&h.scratch), 0);
    }

    #[tokio::test]
    async fn test_flooding_program_with_idle_client_closes_promptly() {
        let h = harness_with_launcher("while :; do echo flood; done");
        let (session, mut rx) = connect(&h.manager);

        h.manager.on_message(&session, &request("c", "int main(){}", None)).await;
        let handle = session.handle().unwrap();

        // Nobody reads: output stops at the bounded queue, the program stalls
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(handle.is_alive());
        assert_eq!(session.state(), SessionState::Running);

        tokio::time::timeout(Duration::from_secs(3), h.manager.on_close(&session))
            .await
            .expect("close must not wait on a full outbound queue");
        assert!(!handle.is_alive());
        assert_eq!(scratch_entries(&h.scratch), 0);

        let mut queued = 0;
        while let Ok(message) = rx.try_recv() {
            assert!(matches!(message, Outbound::Text(_)));
            queued += 1;
        }
        assert!(queued <= OUTBOUND_QUEUE, "{} messages queued", queued);
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_session() {
        let h = harness();
        let mut receivers = Vec::new();

        for _ in 0..3 {
            let (session, rx) = connect(&h.manager);
            h.manager
                .on_message(&session, &request("c", "int main(){scanf(\"%d\");}", None))
                .await;
            assert_eq!(session.state(), SessionState::Running);
            receivers.push(rx);
        }
        assert_eq!(h.manager.active_sessions(), 3);

        h.manager.shutdown_all().await;

        assert_eq!(h.manager.active_sessions(), 0);
        assert_eq!(scratch_entries(&h.scratch), 0);
        for mut rx in receivers {
            let (_, close) = read_until_close(&mut rx).await;
            assert_eq!(close, CloseKind::GoingAway);
        }
    }

    /// Scenario A against the real toolchain
    #[tokio::test]
    #[ignore] // Requires gcc
    async fn test_real_gcc_program() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ToolchainRegistry::from_descriptors(
            ToolchainRegistry::builtin()
                .descriptors()
                .filter(|d| d.language == "c")
                .cloned(),
        )
        .unwrap();
        let h = harness_with(registry, tmp);
        let (session, mut rx) = connect(&h.manager);

        h.manager
            .on_message(
                &session,
                &request("c", "#include <stdio.h>\nint main(){puts(\"hi\");return 0;}", None),
            )
            .await;

        let (text, close) = read_until_close(&mut rx).await;
        assert_eq!(close, CloseKind::Normal);
        assert_eq!(text, "hi\n");
        wait_until_idle(&h.manager).await;
        assert_eq!(scratch_entries(&h.scratch), 0);
    }
}
