use super::*;
use crate::test_support::FlakyStore;
use shared::domain::UserId;

async fn service() -> (MutationService<FlakyStore>, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new().await);
    let session = Session::sign_in(UserId::new("alice"));
    (MutationService::new(Arc::clone(&store), session), store)
}

fn number(name: &str) -> Column {
    Column::new(name, ColumnType::Number)
}

/// Table with columns [A:number, B:text] and rows A=5, A=3.
async fn two_row_table(service: &MutationService<FlakyStore>) -> Table {
    let table = service
        .create_table("Numbers", vec![number("A"), Column::new("B", ColumnType::Text)])
        .await
        .expect("create");
    let a = table.columns[0].id.clone();
    let table = service.add_row(&table).await.expect("row1");
    let table = service.add_row(&table).await.expect("row2");
    let (r1, r2) = (table.rows[0].id.clone(), table.rows[1].id.clone());
    let table = service
        .update_row(&table, &r1, &a, CellValue::from(5_i64))
        .await
        .expect("r1");
    service
        .update_row(&table, &r2, &a, CellValue::from(3_i64))
        .await
        .expect("r2")
}

#[tokio::test]
async fn create_table_keeps_column_order_and_starts_empty() {
    let (service, _store) = service().await;
    let column_sets = vec![
        vec![Column::new("Only", ColumnType::Text)],
        vec![
            Column::new("Name", ColumnType::Text),
            Column::new("Active", ColumnType::Boolean),
            Column::new("Stage", ColumnType::Select).with_options(["lead", "won"]),
            Column::new("Due", ColumnType::Date),
        ],
    ];

    for columns in column_sets {
        let table = service
            .create_table("  Pipeline  ", columns.clone())
            .await
            .expect("create");
        assert_eq!(table.name, "Pipeline");
        assert_eq!(table.columns, columns);
        assert!(table.rows.is_empty());
        assert_eq!(table.owner_id, UserId::new("alice"));
    }

    let stored = service.load_tables().await.expect("load");
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].columns.len(), 4, "newest table comes first");
}

#[tokio::test]
async fn create_table_validation_never_reaches_the_store() {
    let (service, store) = service().await;

    let err = service
        .create_table("   ", vec![Column::new("Name", ColumnType::Text)])
        .await
        .expect_err("blank name");
    assert!(matches!(
        err,
        MutationError::Validation(ValidationError::EmptyTableName)
    ));

    let err = service
        .create_table("Contacts", Vec::new())
        .await
        .expect_err("no columns");
    assert!(matches!(err, MutationError::Validation(ValidationError::NoColumns)));
    assert!(!err.is_user_visible());
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn failed_create_leaves_nothing_behind() {
    let (service, store) = service().await;
    store.fail_op("create_table");

    let err = service
        .create_table("Contacts", vec![Column::new("Name", ColumnType::Text)])
        .await
        .expect_err("remote failure");
    assert!(matches!(
        err,
        MutationError::Persistence {
            operation: "create_table",
            ..
        }
    ));
    assert!(err.is_user_visible());

    store.heal();
    assert!(service.load_tables().await.expect("load").is_empty());
}

#[tokio::test]
async fn add_row_fills_defaults_for_every_column() {
    let (service, _store) = service().await;
    let table = service
        .create_table(
            "Contacts",
            vec![
                Column::new("Name", ColumnType::Text),
                Column::new("Active", ColumnType::Boolean),
            ],
        )
        .await
        .expect("create");
    let (name, active) = (table.columns[0].id.clone(), table.columns[1].id.clone());

    let table = service.add_row(&table).await.expect("add row");
    assert_eq!(table.rows.len(), 1);
    let row = &table.rows[0];
    assert_eq!(row.data.len(), 2);
    assert_eq!(row.data[&name], CellValue::text(""));
    assert_eq!(row.data[&active], CellValue::Bool(false));

    let reloaded = service.load_rows(&table).await.expect("reload");
    assert_eq!(reloaded.rows, table.rows);
}

#[tokio::test]
async fn failed_cell_update_keeps_previous_value() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let a = table.columns[0].id.clone();
    let r1 = table.rows[0].id.clone();

    store.fail_op("update_row");
    let err = service
        .update_row(&table, &r1, &a, CellValue::from(10_i64))
        .await
        .expect_err("remote failure");
    assert!(matches!(err, MutationError::Persistence { operation: "update_row", .. }));
    assert_eq!(table.rows[0].data[&a], CellValue::Number(5.0));

    store.heal();
    let reloaded = service.load_rows(&table).await.expect("reload");
    assert_eq!(reloaded.rows[0].data[&a], CellValue::Number(5.0));
}

#[tokio::test]
async fn cell_update_replaces_the_whole_row_blob() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;
    let (a, b) = (table.columns[0].id.clone(), table.columns[1].id.clone());
    let r1 = table.rows[0].id.clone();

    let table = service
        .update_row(&table, &r1, &b, CellValue::text("note"))
        .await
        .expect("update");
    let reloaded = service.load_rows(&table).await.expect("reload");
    assert_eq!(reloaded.rows[0].data[&a], CellValue::Number(5.0));
    assert_eq!(reloaded.rows[0].data[&b], CellValue::text("note"));
}

#[tokio::test]
async fn cell_update_is_checked_against_the_column() {
    let (service, store) = service().await;
    let table = service
        .create_table(
            "Tickets",
            vec![Column::new("Stage", ColumnType::Select).with_options(["open", "closed"])],
        )
        .await
        .expect("create");
    let stage = table.columns[0].id.clone();
    let table = service.add_row(&table).await.expect("row");
    let row = table.rows[0].id.clone();
    store.clear_calls();

    let err = service
        .update_row(&table, &row, &stage, CellValue::text("pending"))
        .await
        .expect_err("not an option");
    assert!(matches!(
        err,
        MutationError::Validation(ValidationError::OptionNotAllowed { .. })
    ));

    let err = service
        .update_row(&table, &RowId::new("ghost"), &stage, CellValue::text("open"))
        .await
        .expect_err("unknown row");
    assert!(matches!(err, MutationError::Validation(ValidationError::UnknownRow(_))));
    assert!(store.calls().is_empty());

    let table = service
        .update_row(&table, &row, &stage, CellValue::text("closed"))
        .await
        .expect("valid option");
    assert_eq!(table.rows[0].data[&stage], CellValue::text("closed"));
}

#[tokio::test]
async fn delete_column_strips_key_from_every_row() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;
    let a = table.columns[0].id.clone();

    let table = service.delete_column(&table, &a).await.expect("delete");
    assert!(table.column(&a).is_none());
    assert!(table.rows.iter().all(|row| !row.has_value(&a)));
    assert!(table.keys_are_consistent());

    let stored = service.load_tables().await.expect("tables");
    assert_eq!(stored[0].columns.len(), 1);
    let reloaded = service.load_rows(&stored[0]).await.expect("rows");
    assert!(reloaded.rows.iter().all(|row| !row.has_value(&a)));
}

#[tokio::test]
async fn delete_column_rolls_back_when_a_row_strip_fails() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let a = table.columns[0].id.clone();
    let (r1, r2) = (table.rows[0].id.clone(), table.rows[1].id.clone());

    store.fail_row(&r2);
    let err = service
        .delete_column(&table, &a)
        .await
        .expect_err("partial failure");
    let (operation, report) = match err {
        MutationError::Partial {
            operation, report, ..
        } => (operation, report),
        other => panic!("expected partial failure, got {other:?}"),
    };
    assert_eq!(operation, "delete_column");
    assert_eq!(report.succeeded, vec![r1.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].row_id, r2);
    assert!(report.rolled_back);

    store.heal();
    let stored = service.load_tables().await.expect("tables");
    assert_eq!(stored[0].columns.len(), 2, "column list untouched");
    let reloaded = service.load_rows(&stored[0]).await.expect("rows");
    assert_eq!(reloaded.rows[0].data[&a], CellValue::Number(5.0));
    assert_eq!(reloaded.rows[1].data[&a], CellValue::Number(3.0));
}

#[tokio::test]
async fn delete_column_restores_rows_when_column_write_fails() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let a = table.columns[0].id.clone();

    store.fail_op("update_table");
    let err = service
        .delete_column(&table, &a)
        .await
        .expect_err("column write failure");
    let report = match err {
        MutationError::Partial {
            operation: "delete_column",
            report,
            reconciled: None,
        } => report,
        other => panic!("expected partial failure, got {other:?}"),
    };
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.failed.is_empty());
    assert!(report.rolled_back);

    store.heal();
    let reloaded = service.load_rows(&table).await.expect("rows");
    assert!(reloaded.rows.iter().all(|row| row.has_value(&a)));
}

#[tokio::test]
async fn rows_predating_a_column_read_its_default_until_edited() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;
    let (r1, r2) = (table.rows[0].id.clone(), table.rows[1].id.clone());

    let table = service.add_column(&table).await.expect("add column");
    let new_column = table.columns.last().expect("column").clone();
    assert_eq!(new_column.name, DEFAULT_COLUMN_NAME);
    assert_eq!(new_column.column_type, ColumnType::Text);

    let flag = ColumnUpdate {
        name: Some("Done".into()),
        column_type: Some(ColumnType::Boolean),
        ..ColumnUpdate::default()
    };
    let table = service
        .update_column(&table, &new_column.id, flag)
        .await
        .expect("retype");
    let done = table.column(&new_column.id).expect("done").clone();

    // never edited
    assert!(!table.row(&r1).expect("r1").has_value(&done.id));
    assert_eq!(table.row(&r1).expect("r1").value_for(&done), CellValue::Bool(false));

    // edited
    let table = service
        .update_row(&table, &r2, &done.id, CellValue::Bool(true))
        .await
        .expect("edit");
    let reloaded = service.load_rows(&table).await.expect("rows");
    assert!(!reloaded.rows[0].has_value(&done.id));
    assert_eq!(reloaded.rows[0].value_for(&done), CellValue::Bool(false));
    assert_eq!(reloaded.rows[1].data[&done.id], CellValue::Bool(true));
}

#[tokio::test]
async fn update_column_rejects_unknown_ids_and_blank_names() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;

    let err = service
        .update_column(&table, &ColumnId::new("nope"), ColumnUpdate::rename("x"))
        .await
        .expect_err("unknown");
    assert!(matches!(err, MutationError::Validation(ValidationError::UnknownColumn(_))));

    let err = service
        .update_column(&table, &table.columns[0].id, ColumnUpdate::rename("  "))
        .await
        .expect_err("blank");
    assert!(matches!(err, MutationError::Validation(ValidationError::EmptyColumnName)));
}

#[tokio::test]
async fn bulk_delete_reports_exactly_which_rows_went() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let table = service.add_row(&table).await.expect("row3");
    let ids = table.row_ids();

    store.fail_row(&ids[1]);
    let err = service
        .delete_rows(&table, &ids)
        .await
        .expect_err("partial");
    let (report, reconciled) = match err {
        MutationError::Partial {
            report, reconciled, ..
        } => (report, reconciled),
        other => panic!("expected partial failure, got {other:?}"),
    };
    assert_eq!(report.succeeded, vec![ids[0].clone(), ids[2].clone()]);
    assert_eq!(report.failed[0].row_id, ids[1]);
    assert!(!report.rolled_back);

    let reconciled = reconciled.expect("reconciled table");
    assert_eq!(reconciled.row_ids(), vec![ids[1].clone()]);

    store.heal();
    let reloaded = service.load_rows(&table).await.expect("rows");
    assert_eq!(reloaded.row_ids(), vec![ids[1].clone()]);
}

#[tokio::test]
async fn bulk_delete_deletes_a_repeated_id_once() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let r1 = table.rows[0].id.clone();
    store.clear_calls();

    let table = service
        .delete_rows(&table, &[r1.clone(), r1.clone()])
        .await
        .expect("delete");
    assert!(table.row(&r1).is_none());
    assert_eq!(table.rows.len(), 1);
    assert_eq!(store.calls(), ["delete_row"]);
}

#[tokio::test]
async fn delete_row_removes_locally_and_remotely() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;
    let r1 = table.rows[0].id.clone();

    let table = service.delete_row(&table, &r1).await.expect("delete");
    assert!(table.row(&r1).is_none());
    assert_eq!(service.load_rows(&table).await.expect("rows").rows.len(), 1);
}

#[tokio::test]
async fn result_is_discarded_after_generation_advances() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    let a = table.columns[0].id.clone();
    let r1 = table.rows[0].id.clone();

    let (entered, release) = store.hold_row_updates();
    let task = {
        let service = service.clone();
        let table = table.clone();
        tokio::spawn(async move {
            service
                .update_row(&table, &r1, &a, CellValue::from(99_i64))
                .await
        })
    };

    entered.notified().await;
    service.session().advance();
    release.notify_one();

    let result = task.await.expect("join");
    assert!(matches!(
        result,
        Err(MutationError::Stale {
            issued: 0,
            current: 1
        })
    ));
}

#[tokio::test]
async fn signed_out_session_rejects_mutations_before_any_remote_call() {
    let (service, store) = service().await;
    let table = two_row_table(&service).await;
    store.clear_calls();

    service.session().sign_out();
    let err = service.add_row(&table).await.expect_err("signed out");
    assert!(matches!(err, MutationError::SessionClosed));
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn rename_table_trims_and_persists() {
    let (service, _store) = service().await;
    let table = two_row_table(&service).await;

    let renamed = service
        .rename_table(&table, "  Scores ")
        .await
        .expect("rename");
    assert_eq!(renamed.name, "Scores");
    assert_eq!(service.load_tables().await.expect("load")[0].name, "Scores");
}
