use pretty_assertions::assert_eq;
use tokio::sync::oneshot;

use super::{label_transient_transaction_error, OperationExecutor};
use crate::{
    bson::doc,
    error::{
        CommandError,
        Error,
        ErrorKind,
        TRANSIENT_TRANSACTION_ERROR,
        UNKNOWN_TRANSACTION_COMMIT_RESULT,
    },
    operation::{Insert, RunCommand},
    options::ServerAddress,
    selection_criteria::ReadPreference,
    session::{SessionContext, TransactionOptions},
    test::{mock_cluster, primary, secondary, MockReply},
};

fn address(address: &str) -> ServerAddress {
    ServerAddress::parse(address).unwrap()
}

fn insert() -> Insert {
    Insert::new("db", "coll", vec![doc! { "x": 1 }]).unwrap()
}

#[tokio::test]
async fn network_errors_in_transactions_are_transient() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017")]);
    let a = address("a:27017");
    let executor = OperationExecutor::new(cluster.clone());
    let session = cluster.start_session().await.unwrap();
    session.start_transaction(None).unwrap();

    establisher.push_reply(&a, MockReply::network_error());
    establisher.push_reply(&a, MockReply::network_error());
    let error = executor
        .execute_write(&insert(), Some(&session))
        .await
        .unwrap_err();

    assert!(error.contains_label(TRANSIENT_TRANSACTION_ERROR));
    match *error.kind {
        ErrorKind::Io(ref io) => assert_eq!(io.kind(), std::io::ErrorKind::ConnectionReset),
        ref other => panic!("expected a network error, got {:?}", other),
    }
    assert_eq!(establisher.command_names(), vec!["insert", "insert"]);
}

#[tokio::test]
async fn errors_outside_transactions_are_not_labeled() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017")]);
    let a = address("a:27017");
    let executor = OperationExecutor::new(cluster);

    establisher.push_reply(&a, MockReply::network_error());
    let error = executor
        .execute_read(
            &RunCommand::new("admin", doc! { "ping": 1 }).unwrap(),
            ReadPreference::Primary,
            None,
        )
        .await
        .unwrap_err();
    assert!(error.is_network_error());
    assert!(!error.contains_label(TRANSIENT_TRANSACTION_ERROR));
}

#[tokio::test]
async fn transient_labeling_rules() {
    let (cluster, _) = mock_cluster(vec![primary("a:27017")]);
    let session = cluster.start_session().await.unwrap();
    let context = SessionContext::new(session.clone(), true);

    let network = || Error::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
    let timeout = || Error::server_selection("no suitable server");
    let command = || Error::from(ErrorKind::Command(CommandError::new(2, "BadValue", "bad")));

    // No transaction yet.
    assert!(!label_transient_transaction_error(network(), &context)
        .contains_label(TRANSIENT_TRANSACTION_ERROR));

    session.start_transaction(None).unwrap();
    assert!(label_transient_transaction_error(network(), &context)
        .contains_label(TRANSIENT_TRANSACTION_ERROR));
    assert!(label_transient_transaction_error(timeout(), &context)
        .contains_label(TRANSIENT_TRANSACTION_ERROR));
    assert!(!label_transient_transaction_error(command(), &context)
        .contains_label(TRANSIENT_TRANSACTION_ERROR));

    let unknown_commit = network().with_label(UNKNOWN_TRANSACTION_COMMIT_RESULT);
    let labeled = label_transient_transaction_error(unknown_commit, &context);
    assert!(!labeled.contains_label(TRANSIENT_TRANSACTION_ERROR));
    assert!(labeled.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT));

    assert!(!label_transient_transaction_error(network(), &SessionContext::default())
        .contains_label(TRANSIENT_TRANSACTION_ERROR));
}

#[tokio::test]
async fn secondary_reads_rejected_in_transactions() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017"), secondary("b:27017")]);
    let executor = OperationExecutor::new(cluster.clone());
    let session = cluster.start_session().await.unwrap();
    session.start_transaction(None).unwrap();

    let ping = RunCommand::new("admin", doc! { "ping": 1 }).unwrap();
    let error = executor
        .execute_read(
            &ping,
            ReadPreference::Secondary { options: None },
            Some(&session),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(
            *error.kind,
            ErrorKind::InvalidReadPreferenceInTransaction { .. }
        ),
        "{:?}",
        error
    );

    // A transaction configured with a secondary read preference is rejected at the binding.
    session.mark_aborted();
    session
        .start_transaction(
            TransactionOptions::builder()
                .read_preference(ReadPreference::Secondary { options: None })
                .build(),
        )
        .unwrap();
    let error = executor
        .execute_read(&ping, ReadPreference::Primary, Some(&session))
        .await
        .unwrap_err();
    assert!(matches!(
        *error.kind,
        ErrorKind::InvalidReadPreferenceInTransaction { .. }
    ));

    assert!(establisher.commands().is_empty());
}

#[tokio::test]
async fn implicit_sessions_end_with_the_operation() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017"), secondary("b:27017")]);
    let executor = OperationExecutor::new(cluster.clone());

    let reply = executor
        .execute_read(
            &RunCommand::new("admin", doc! { "ping": 1 }).unwrap(),
            ReadPreference::Secondary { options: None },
            None,
        )
        .await
        .unwrap();
    assert_eq!(reply, doc! { "ok": 1 });
    assert_eq!(establisher.commands()[0].address, address("b:27017"));
    assert_eq!(cluster.session_pool().len(), 1);

    let result = executor.execute_write(&insert(), None).await.unwrap();
    assert_eq!(result.inserted_count, 0);
    assert_eq!(cluster.session_pool().len(), 1);

    // Both operations ran with the same pooled server session.
    let commands = establisher.commands();
    assert_eq!(
        commands[0].command.body.get_document("lsid").unwrap(),
        commands[1].command.body.get_document("lsid").unwrap()
    );
}

#[tokio::test]
async fn explicit_sessions_outlive_the_operation() {
    let (cluster, _) = mock_cluster(vec![primary("a:27017")]);
    let executor = OperationExecutor::new(cluster.clone());
    let session = cluster.start_session().await.unwrap();

    executor.execute_write(&insert(), Some(&session)).await.unwrap();
    assert!(!session.is_ended());
    assert_eq!(session.txn_number(), 1);
    assert_eq!(cluster.session_pool().len(), 0);
}

#[tokio::test]
async fn callbacks_receive_the_result() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017")]);
    let a = address("a:27017");
    let executor = OperationExecutor::new(cluster);

    let (sender, receiver) = oneshot::channel();
    executor.execute_write_with_callback(insert(), None, move |result| {
        let _ = sender.send(result);
    });
    assert!(receiver.await.unwrap().is_ok());

    establisher.push_reply(&a, MockReply::command_error(13, "unauthorized"));
    let (sender, receiver) = oneshot::channel();
    executor.execute_read_with_callback(
        RunCommand::new("admin", doc! { "ping": 1 }).unwrap(),
        ReadPreference::Primary,
        None,
        move |result| {
            let _ = sender.send(result);
        },
    );
    let error = receiver.await.unwrap().unwrap_err();
    assert_eq!(error.code(), Some(13));
}
