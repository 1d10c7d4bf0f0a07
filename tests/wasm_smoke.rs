#![cfg(target_arch = "wasm32")]

mod common;

use std::time::Duration;

use common::{harness, User};
use firestore_orm::orm::{Model, SaveMode};
use firestore_orm::store::StoreSettings;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn browser_settings_use_short_idle_ttl() {
    assert_eq!(StoreSettings::default().idle_ttl, Duration::from_secs(1));
}

#[wasm_bindgen_test(async)]
async fn save_then_find_round_trip() {
    let h = harness();
    let mut user = User::new("John Doe", "john@example.com");
    h.db.save(&mut user, SaveMode::Replace).await.unwrap();

    let loaded = h.db.find::<User>(user.id()).unwrap().get().await.unwrap();
    assert_eq!(loaded.name, "John Doe");
}
