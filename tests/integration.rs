use std::path::{Path, PathBuf};
use std::sync::Arc;

use codesum_core::{AskRequest, CodeQa, Config, ConversationTurn, ErrorKind};
use codesum_llm::Role;
use codesum_llm::mock::MockProvider;
use git2::{Repository, Signature};

// -- Fixtures --

/// A git repository to ask about plus an isolated cache and prompt.
struct Workspace {
    _dir: tempfile::TempDir,
    origin: PathBuf,
    config: Config,
}

impl Workspace {
    fn new(files: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("tool");
        commit_files(&origin, files, "Add greeting module");

        let prompt = dir.path().join("prompt.txt");
        std::fs::write(
            &prompt,
            "Repository {repository} at \"{commit_message}\" by {commit_author}\n{context}",
        )
        .unwrap();

        let mut config = Config::default();
        config.cache.root = dir.path().join("repos");
        config.prompt.system_path = prompt;

        Self {
            _dir: dir,
            origin,
            config,
        }
    }

    fn url(&self) -> String {
        self.origin.to_str().unwrap().to_owned()
    }

    fn engine(&self, provider: &MockProvider) -> CodeQa<MockProvider> {
        CodeQa::from_config(&self.config, Arc::new(provider.clone())).unwrap()
    }
}

fn commit_files(dir: &Path, files: &[(&str, &str)], message: &str) {
    std::fs::create_dir_all(dir).unwrap();
    let repo = Repository::init(dir).unwrap();
    let sig = Signature::now("Grace Hopper", "grace@example.com").unwrap();
    let mut index = repo.index().unwrap();
    for (name, content) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        index.add_path(Path::new(name)).unwrap();
    }
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])
        .unwrap();
}

const GREETING: &str = "pub fn greet() -> &'static str { \"hello, world!\" }";

// -- End-to-end --

#[tokio::test]
async fn single_file_repository_is_answered_from_one_chunk() {
    assert_eq!(GREETING.len(), 50);
    let ws = Workspace::new(&[("src/lib.rs", GREETING)]);
    let provider = MockProvider::with_responses(vec!["It greets the world.".into()]);
    let qa = ws.engine(&provider);

    let answer = qa
        .ask(AskRequest::new(ws.url()).with_question("What does greet return?"))
        .await
        .unwrap();

    assert_eq!(answer.answer, "It greets the world.");
    assert_eq!(answer.commit_message, "Add greeting module");
    assert_eq!(answer.commit_author, "Grace Hopper <grace@example.com>");
    // The single chunk plus the search query.
    assert_eq!(provider.embedded_texts(), 2);

    let calls = provider.chat_calls();
    assert_eq!(calls.len(), 1);
    let system = &calls[0][0];
    assert_eq!(system.role, Role::System);
    assert!(system.content.contains("Repository tool at \"Add greeting module\""));
    assert!(system.content.contains(GREETING));
}

#[tokio::test]
async fn empty_history_asks_the_question_as_is() {
    let ws = Workspace::new(&[("README.md", "# tool\n\nPrints a friendly greeting.\n")]);
    let provider = MockProvider::default();
    let qa = ws.engine(&provider);

    let answer = qa
        .ask(AskRequest::new(ws.url()).with_question("What does this print?"))
        .await
        .unwrap();
    assert!(!answer.answer.is_empty());

    let calls = provider.chat_calls();
    assert_eq!(calls.len(), 1, "no rewrite call without history");
    let question = calls[0].last().unwrap();
    assert_eq!(question.role, Role::User);
    assert_eq!(question.content, "What does this print?");
}

#[tokio::test]
async fn follow_up_is_rewritten_before_retrieval() {
    let ws = Workspace::new(&[
        ("src/lib.rs", GREETING),
        ("README.md", "# tool\n\nPrints a friendly greeting.\n"),
    ]);
    let provider = MockProvider::with_responses(vec![
        "greet function return value".into(),
        "It returns a static string.".into(),
    ]);
    let qa = ws.engine(&provider);

    let request = AskRequest::new(ws.url())
        .with_history(vec![
            ConversationTurn::user("What is this?"),
            ConversationTurn::assistant("A greeting library."),
        ])
        .with_question("What does it return?");
    let answer = qa.ask(request).await.unwrap();
    assert_eq!(answer.answer, "It returns a static string.");

    let calls = provider.chat_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].len(), 4, "history, turn, rewrite instruction");
    let final_roles: Vec<Role> = calls[1].iter().map(|m| m.role).collect();
    assert_eq!(
        final_roles,
        [Role::System, Role::User, Role::Assistant, Role::User]
    );
}

#[tokio::test]
async fn unreachable_repository_fails_before_any_model_call() {
    let ws = Workspace::new(&[("README.md", "# tool\n")]);
    let provider = MockProvider::default();
    let qa = ws.engine(&provider);

    let missing = ws.origin.with_file_name("missing");
    let err = qa
        .ask(AskRequest::new(missing.to_str().unwrap()).with_question("Anything?"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(provider.chat_calls().is_empty());
    assert_eq!(provider.embed_calls(), 0);
}

#[tokio::test]
async fn fresh_snapshot_is_reused_without_fetching() {
    let ws = Workspace::new(&[("src/lib.rs", GREETING)]);
    let provider = MockProvider::default();
    let qa = ws.engine(&provider);

    qa.ask(AskRequest::new(ws.url())).await.unwrap();
    std::fs::remove_dir_all(&ws.origin).unwrap();

    // The origin is gone; only the cached snapshot can answer.
    let answer = qa.ask(AskRequest::new(ws.url())).await.unwrap();
    assert_eq!(answer.commit_message, "Add greeting module");
}

#[tokio::test]
async fn concurrent_requests_for_one_repository_share_a_snapshot() {
    let ws = Workspace::new(&[("src/lib.rs", GREETING)]);
    let provider = MockProvider::default();
    let qa = ws.engine(&provider);

    let (a, b) = tokio::join!(
        qa.ask(AskRequest::new(ws.url()).with_question("first")),
        qa.ask(AskRequest::new(ws.url()).with_question("second")),
    );
    assert_eq!(a.unwrap().commit_message, "Add greeting module");
    assert_eq!(b.unwrap().commit_message, "Add greeting module");

    let snapshots: Vec<_> = std::fs::read_dir(&ws.config.cache.root)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(snapshots.len(), 1);
}
