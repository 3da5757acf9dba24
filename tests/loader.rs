//! Integration tests for the workflow loader cache

mod common;

use std::sync::Arc;

use common::{FakeService, TestContext};
use wftester::testing::WorkflowLoader;
use wftester::Error;

#[tokio::test]
async fn test_repeated_loads_share_one_import() {
    let ctx = TestContext::new();
    let service = Arc::new(FakeService::echo());
    let loader = WorkflowLoader::new(service.clone());
    let path = ctx.path("workflow.ga");

    let first = loader.load(&path, Some("case")).await.unwrap();
    let second = loader.load(&path, Some("case")).await.unwrap();

    assert_eq!(first.handle, second.handle);
    assert_eq!(service.count("import_workflow"), 1);
    assert_eq!(service.calls()[0], "import_workflow:WorkflowTest_case");
    assert_eq!(first.definition.input_labels(), vec![common::INPUT_LABEL]);

    loader.release(&first.handle).await.unwrap();
    assert_eq!(service.live_workflows(), 1);
    loader.release(&second.handle).await.unwrap();
    assert_eq!(service.live_workflows(), 0);
    assert_eq!(loader.loaded_count().await, 0);
}

#[tokio::test]
async fn test_name_override_is_part_of_the_key() {
    let ctx = TestContext::new();
    let service = Arc::new(FakeService::echo());
    let loader = WorkflowLoader::new(service.clone());
    let path = ctx.path("workflow.ga");

    let named = loader.load(&path, Some("one")).await.unwrap();
    let default = loader.load(&path, None).await.unwrap();

    assert_ne!(named.handle, default.handle);
    assert!(service
        .calls()
        .contains(&"import_workflow:WorkflowTest_ChangeCase".to_string()));
    assert_eq!(loader.loaded_count().await, 2);
}

#[tokio::test]
async fn test_unload_ignores_holders() {
    let ctx = TestContext::new();
    let service = Arc::new(FakeService::echo());
    let loader = WorkflowLoader::new(service.clone());
    let path = ctx.path("workflow.ga");

    let loaded = loader.load(&path, None).await.unwrap();
    loader.load(&path, None).await.unwrap();
    loader.unload(&loaded.handle).await.unwrap();

    assert_eq!(service.live_workflows(), 0);
    assert_eq!(loader.loaded_count().await, 0);
    // a stale release is harmless
    loader.release(&loaded.handle).await.unwrap();
    assert_eq!(service.count("delete_workflow"), 1);
}

#[tokio::test]
async fn test_unload_all() {
    let ctx = TestContext::new();
    ctx.write_workflow("second.ga");
    let service = Arc::new(FakeService::echo());
    let loader = WorkflowLoader::new(service.clone());

    loader.load(&ctx.path("workflow.ga"), None).await.unwrap();
    loader.load(&ctx.path("second.ga"), Some("second")).await.unwrap();
    assert_eq!(service.live_workflows(), 2);

    loader.unload_all().await.unwrap();
    assert_eq!(service.live_workflows(), 0);
    assert_eq!(loader.loaded_count().await, 0);
}

#[tokio::test]
async fn test_missing_or_malformed_definition() {
    let ctx = TestContext::new();
    ctx.write("broken.ga", "{ not json");
    let service = Arc::new(FakeService::echo());
    let loader = WorkflowLoader::new(service.clone());

    let missing = loader.load(&ctx.path("nope.ga"), None).await.unwrap_err();
    assert!(matches!(missing, Error::NotFound(_)));

    let broken = loader.load(&ctx.path("broken.ga"), None).await.unwrap_err();
    assert!(broken.is_configuration());
    assert!(service.calls().is_empty());
}
