use std::sync::mpsc;

use pretty_assertions::assert_eq;

use crate::{
    bson::doc,
    cmap::Command,
    error::ErrorKind,
    operation::{CommitTransaction, Insert, RunCommand},
    options::ServerAddress,
    selection_criteria::ReadPreference,
    session::TransactionState,
    sync::{ClusterBinding, OperationExecutor},
    test::{mock_cluster, primary, secondary, MockReply},
};

fn address(address: &str) -> ServerAddress {
    ServerAddress::parse(address).unwrap()
}

#[test]
fn execute_read_and_write() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017"), secondary("b:27017")]);
    let a = address("a:27017");
    let executor = OperationExecutor::new(cluster);

    let reply = executor
        .execute_read(
            &RunCommand::new("admin", doc! { "ping": 1 }).unwrap(),
            ReadPreference::Secondary { options: None },
            None,
        )
        .unwrap();
    assert_eq!(reply, doc! { "ok": 1 });

    establisher.push_reply(&a, MockReply::command_error(91, "shutting down"));
    establisher.push_reply(&a, MockReply::Reply(doc! { "ok": 1, "n": 1 }));
    let result = executor
        .execute_write(
            &Insert::new("db", "coll", vec![doc! { "x": 1 }]).unwrap(),
            None,
        )
        .unwrap();
    assert_eq!(result.inserted_count, 1);
    assert_eq!(establisher.command_names(), vec!["ping", "insert", "insert"]);

    let status = executor.cluster().pool_status(&a).unwrap();
    assert_eq!(status.checked_out, 0);
}

#[test]
fn transactions() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017")]);
    let executor = OperationExecutor::new(cluster);
    let session = executor.start_session().unwrap();
    session.start_transaction(None).unwrap();

    executor
        .execute_write(
            &Insert::new("db", "coll", vec![doc! { "x": 1 }]).unwrap(),
            Some(&session),
        )
        .unwrap();
    executor
        .execute_write(&CommitTransaction::new(), Some(&session))
        .unwrap();
    assert_eq!(session.transaction_state(), TransactionState::Committed);
    assert_eq!(
        establisher.command_names(),
        vec!["insert", "commitTransaction"]
    );

    session.start_transaction(None).unwrap();
    let error = executor
        .execute_read(
            &RunCommand::new("db", doc! { "find": "coll" }).unwrap(),
            ReadPreference::Nearest { options: None },
            Some(&session),
        )
        .unwrap_err();
    assert!(matches!(
        *error.kind,
        ErrorKind::InvalidReadPreferenceInTransaction { .. }
    ));
}

#[test]
fn binding_sources_and_connections() {
    let (cluster, establisher) = mock_cluster(vec![primary("a:27017"), secondary("b:27017")]);
    let a = address("a:27017");
    let binding =
        ClusterBinding::new(&cluster, ReadPreference::Secondary { options: None }, None).unwrap();
    assert!(binding.owns_session());
    assert_eq!(
        binding.read_preference(),
        ReadPreference::Secondary { options: None }
    );

    let read = binding.read_connection_source().unwrap();
    assert_eq!(read.server_description().address, address("b:27017"));
    read.release();

    let source = binding.write_connection_source().unwrap();
    let retained = source.retain();
    let mut connection = source.connection().unwrap();
    assert_eq!(connection.description().server_address, a);

    let reply = connection
        .command(
            Command::new("admin", doc! { "ping": 1 }),
            source.session_context(),
        )
        .unwrap();
    assert_eq!(reply, doc! { "ok": 1 });
    assert_eq!(
        establisher.commands()[0].command.body.get_document("lsid").unwrap(),
        &binding.session_context().session_id().unwrap()
    );

    drop(connection);
    source.release();
    drop(retained);
    let status = cluster.pool_status(&a).unwrap();
    assert_eq!(status.checked_out, 0);
    assert_eq!(status.idle, 1);

    let session = binding.session_context().session().unwrap().clone();
    drop(binding);
    assert!(session.is_ended());
}

#[test]
fn callbacks_without_a_runtime() {
    let (cluster, _) = mock_cluster(vec![primary("a:27017")]);
    let executor = crate::OperationExecutor::new(cluster);

    let (sender, receiver) = mpsc::channel();
    executor.execute_read_with_callback(
        RunCommand::new("admin", doc! { "ping": 1 }).unwrap(),
        ReadPreference::Primary,
        None,
        move |result| {
            let _ = sender.send(result);
        },
    );
    let reply = receiver.recv().unwrap().unwrap();
    assert_eq!(reply, doc! { "ok": 1 });
    assert!(receiver.recv().is_err());
}
