#![cfg(not(target_arch = "wasm32"))]

mod common;

use common::{harness, Article, Comment, User};
use firestore_orm::firestore::{FirestoreErrorCode, FirestoreError};
use firestore_orm::orm::{Model, RelationTarget, SaveMode};

#[tokio::test(start_paused = true)]
async fn unsaved_author_is_saved_before_article() {
    let h = harness();
    let author = User::new("Ada", "ada@example.com");
    let mut article = Article::new("Engines", "On analytical engines");
    Article::AUTHOR
        .set(&article, RelationTarget::Entity(author.clone()))
        .unwrap();
    assert!(article.meta().relations().is_draft("author"));

    h.db.save(&mut article, SaveMode::Replace).await.unwrap();

    let author_path = format!("users/{}", author.id());
    let stored_author = h.backend.document(&author_path).unwrap();
    assert_eq!(
        stored_author.get("name").and_then(|value| value.as_str()),
        Some("Ada")
    );

    let stored_article = h
        .backend
        .document(&format!("articles/{}", article.id()))
        .unwrap();
    assert_eq!(
        stored_article.get("author"),
        Some(&author.reference().unwrap().to_value())
    );
    assert!(!article.meta().relations().is_draft("author"));

    let related = Article::AUTHOR.get(&h.db, &article).unwrap().unwrap();
    assert!(!related.is_draft());
    assert_eq!(related.get().await.unwrap().name, "Ada");
}

#[tokio::test(start_paused = true)]
async fn loaded_entities_link_their_references() {
    let h = harness();
    let mut author = User::new("Grace", "grace@example.com");
    h.db.save(&mut author, SaveMode::Replace).await.unwrap();

    let mut article = Article::new("Compilers", "A-0");
    Article::AUTHOR
        .set(&article, RelationTarget::id(author.id()))
        .unwrap();
    h.db.save(&mut article, SaveMode::Replace).await.unwrap();

    let loaded = h.db.find::<Article>(article.id()).unwrap().get().await.unwrap();
    let linked = loaded.meta().relations().linked("author").unwrap();
    assert_eq!(linked, author.reference().unwrap());

    let related = Article::AUTHOR.get(&h.db, &loaded).unwrap().unwrap();
    assert_eq!(related.get().await.unwrap().name, "Grace");
}

#[tokio::test(start_paused = true)]
async fn persisted_targets_are_linked_without_saving() {
    let h = harness();
    let mut author = User::new("Linus", "linus@example.com");
    h.db.save(&mut author, SaveMode::Replace).await.unwrap();
    let author_path = format!("users/{}", author.id());

    let mut article = Article::new("Kernels", "Monolithic");
    Article::AUTHOR
        .set(&article, RelationTarget::Entity(author.clone()))
        .unwrap();
    assert!(!article.meta().relations().is_draft("author"));
    h.db.save(&mut article, SaveMode::Replace).await.unwrap();

    assert_eq!(h.backend.write_count(&author_path), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_relation_save_aborts_owner() {
    let h = harness();
    let mut article = Article::new("Offline", "Nothing lands");
    Article::AUTHOR
        .set(&article, RelationTarget::Entity(User::new("Ghost", "ghost@example.com")))
        .unwrap();

    h.backend.set_write_failure(Some(FirestoreError::new(
        FirestoreErrorCode::Unavailable,
        "offline",
    )));
    let error = h.db.save(&mut article, SaveMode::Replace).await.unwrap_err();
    assert_eq!(error.code, FirestoreErrorCode::Unavailable);
    assert!(h.backend.document(&format!("articles/{}", article.id())).is_none());
    assert!(article.meta().relations().is_draft("author"));
}

#[tokio::test(start_paused = true)]
async fn has_many_queries_by_owner_reference() {
    let h = harness();
    let mut author = User::new("Ada", "ada@example.com");
    h.db.save(&mut author, SaveMode::Replace).await.unwrap();

    for title in ["Notes", "Sketches"] {
        let mut article = Article::new(title, "");
        Article::AUTHOR
            .set(&article, RelationTarget::Entity(author.clone()))
            .unwrap();
        h.db.save(&mut article, SaveMode::Replace).await.unwrap();
    }
    let mut other = Article::new("Elsewhere", "");
    h.db.save(&mut other, SaveMode::Replace).await.unwrap();

    let articles = User::ARTICLES.get(&h.db, &author).unwrap();
    let mut titles: Vec<String> = articles
        .get()
        .await
        .unwrap()
        .into_iter()
        .map(|article| article.title)
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Notes".to_string(), "Sketches".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn sub_collection_entities_live_under_owner() {
    let h = harness();
    let commenter = User::new("Bob", "bob@example.com");
    let mut article = Article::new("Threads", "");
    h.db.save(&mut article, SaveMode::Replace).await.unwrap();

    let comments = Article::COMMENTS.get(&h.db, &article).unwrap();
    let comment = Comment::new("First!");
    Comment::AUTHOR
        .set(&comment, RelationTarget::Entity(commenter.clone()))
        .unwrap();
    let saved = comments.add(comment).await.unwrap();

    let expected_collection = format!("articles/{}/comments", article.id());
    assert_eq!(Article::COMMENTS.collection_path(&article), expected_collection);
    assert_eq!(saved.collection_path(), expected_collection);
    let stored = h
        .backend
        .document(&format!("{expected_collection}/{}", saved.id()))
        .unwrap();
    assert_eq!(
        stored.get("author"),
        Some(&commenter.reference().unwrap().to_value())
    );
    assert!(h.backend.document(&format!("users/{}", commenter.id())).is_some());

    let listed = comments.get().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].body, "First!");
    assert_eq!(listed[0].collection_path(), expected_collection);
}
