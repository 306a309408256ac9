//! Shared wiremock fixtures for the end-to-end scenario tests.
//!
//! Grounded on `examples/Wandalen-api_llm/api/huggingface/tests/health_check_tests.rs`'s
//! `MockServer::start` / `Mock::given` / `respond_with` shape; the WBI
//! bootstrap stub in particular is shared by every scenario that signs a
//! request, since the mixin key it produces is otherwise irrelevant to what
//! each scenario is actually checking.

use std::sync::Arc;

use biliclaw_core::credential::{CredentialPool, SelectionStrategy};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mounts a `nav` stub returning fixed WBI image URLs, so the signer always
/// derives the same mixin key regardless of which scenario is running.
pub async fn mount_nav(server: &MockServer) {
  Mock::given(method("GET"))
    .and(path("/x/web-interface/nav"))
    .respond_with(ResponseTemplate::new(200).set_body_json(json!({
      "code": 0,
      "message": "0",
      "data": {
        "isLogin": false,
        "wbi_img": {
          "img_url": "https://i0.example/bfs/wbi/7cd084941338484aae1ad9425b84077c.png",
          "sub_url": "https://i0.example/bfs/wbi/4932caff0ff746eab6f01bf08b70ac45.png"
        }
      }
    })))
    .mount(server)
    .await;
}

/// An unauthenticated pool: requests proceed without a bound credential.
#[must_use]
pub fn empty_credential_pool() -> Arc<CredentialPool> {
  Arc::new(CredentialPool::new(vec![], SelectionStrategy::RoundRobin))
}
