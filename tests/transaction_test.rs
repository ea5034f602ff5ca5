//! Integration tests for the transaction factory.

mod common;

use common::ScriptedTransactionManager;
use hosted_pool::db::{LocalTransactionManager, TransactionFactory, TransactionRequest};
use hosted_pool::error::PoolError;
use hosted_pool::models::TransactionStatus;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_no_manager_means_unsupported() {
    let factory = TransactionFactory::unsupported();
    assert!(!factory.supports_transactions());

    let request = factory.request_transaction().await.unwrap();
    assert!(matches!(request, TransactionRequest::Unsupported));
    assert!(!factory.is_transaction_in_progress(None).await.unwrap());
    factory.rollback(request.handle()).await;
}

#[tokio::test]
async fn test_rollback_of_nothing_succeeds() {
    let manager = Arc::new(ScriptedTransactionManager::new(
        TransactionStatus::NoTransaction,
    ));
    let factory = TransactionFactory::new(manager.clone());

    factory.rollback(None).await;
    assert_eq!(manager.rollbacks.load(Ordering::SeqCst), 0);

    // The manager reports no transaction and refuses the rollback; the
    // factory logs and carries on.
    let handle = factory.request_transaction().await.unwrap().into_handle().unwrap();
    factory.rollback(Some(&handle)).await;
    assert_eq!(manager.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(handle.last_status(), TransactionStatus::NoTransaction);
    assert!(factory.open_transactions().await.is_empty());
}

#[tokio::test]
async fn test_in_progress_statuses() {
    let manager = Arc::new(ScriptedTransactionManager::new(TransactionStatus::Active));
    let factory = TransactionFactory::new(manager.clone());
    let handle = factory.request_transaction().await.unwrap().into_handle().unwrap();

    for (status, expected) in [
        (TransactionStatus::Active, true),
        (TransactionStatus::MarkedRollback, true),
        (TransactionStatus::Unknown, true),
        (TransactionStatus::NoTransaction, false),
    ] {
        manager.set_status(status);
        assert_eq!(
            factory.is_transaction_in_progress(Some(&handle)).await.unwrap(),
            expected,
            "{status}"
        );
    }
}

#[tokio::test]
async fn test_terminal_status_is_not_queried_again() {
    let manager = Arc::new(ScriptedTransactionManager::new(TransactionStatus::Active));
    let factory = TransactionFactory::new(manager.clone());
    let handle = factory.request_transaction().await.unwrap().into_handle().unwrap();

    factory.commit(&handle).await.unwrap();
    let queries = manager.status_queries.load(Ordering::SeqCst);
    assert!(!factory.is_transaction_in_progress(Some(&handle)).await.unwrap());
    assert_eq!(manager.status_queries.load(Ordering::SeqCst), queries);
}

#[tokio::test]
async fn test_status_failure_is_propagated() {
    let factory = TransactionFactory::new(Arc::new(ScriptedTransactionManager::failing()));
    let handle = factory.request_transaction().await.unwrap().into_handle().unwrap();

    let err = factory.status(&handle).await.unwrap_err();
    match err {
        PoolError::TransactionStatus { transaction_id, .. } => {
            assert_eq!(transaction_id, handle.id())
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(factory.verify_completed(&handle).await.is_err());
}

#[tokio::test]
async fn test_local_manager_timeout_forces_rollback() {
    let manager = LocalTransactionManager::with_timeout(Duration::from_millis(10));
    let factory = TransactionFactory::new(Arc::new(manager));
    let handle = factory.request_transaction().await.unwrap().into_handle().unwrap();
    assert!(handle.id().starts_with("tx_"));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(
        factory.status(&handle).await.unwrap(),
        TransactionStatus::MarkedRollback
    );
    assert!(factory.commit(&handle).await.is_err());
    assert!(factory.verify_completed(&handle).await.is_ok());
}

#[tokio::test]
async fn test_stop_then_reset() {
    let factory = TransactionFactory::new(Arc::new(LocalTransactionManager::new()));
    let first = factory.request_transaction().await.unwrap().into_handle().unwrap();
    let second = factory.request_transaction().await.unwrap().into_handle().unwrap();
    factory.commit(&first).await.unwrap();
    assert_eq!(factory.open_transactions().await.len(), 1);

    factory.stop().await;
    assert_eq!(second.last_status(), TransactionStatus::RolledBack);
    assert!(factory.open_transactions().await.is_empty());
    assert!(factory.request_transaction().await.is_err());

    factory.reset().await;
    let third = factory.request_transaction().await.unwrap();
    assert!(third.is_supported());
}
