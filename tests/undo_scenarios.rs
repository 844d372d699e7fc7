//! End-to-end "undo refuses unsafe rollback" scenario (spec §8.6).

use cortex_core::transaction_history::{TransactionHistory, TransactionType, UndoManager};
use std::sync::Arc;

#[tokio::test]
async fn undo_refuses_critical_package_rollback_until_forced() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(TransactionHistory::open(&dir.path().join("tx.db")).unwrap());
    let manager = UndoManager::new(history.clone());

    let mut transaction = history
        .begin(TransactionType::Install, vec!["libc6".to_string()], "apt install -y libc6")
        .await
        .unwrap();
    // libc6 matches the critical-package substring list regardless of
    // whether dpkg/apt are available in the environment running this test.
    assert!(!transaction.is_rollback_safe);

    history.complete(&mut transaction, true, None).await.unwrap();

    let refused = manager.undo(&transaction.id, false, false).await.unwrap();
    assert!(!refused.success);
    assert_eq!(refused.errors, vec!["Unsafe rollback - use force=True to override".to_string()]);

    let forced = manager.undo(&transaction.id, true, true).await.unwrap();
    assert!(forced.success);
}
