#[cfg(test)]
mod __test__ {
  use crate::error::{LogixError, Result};
  use crate::query::{
    quote, LogFilterCriteria, LogQueryRequest, LogQueryService, LogRealtimeRequest, PageResult,
    RunLogReader, TraceLogReader, TraceQueryRequest, TraceQueryService, DEFAULT_WINDOW_MS,
  };
  use crate::store::{Row, StoreClient};
  use serde_json::{json, Value};
  use std::collections::VecDeque;
  use std::sync::{Arc, Mutex};

  /// Records every statement and answers with queued canned rows.
  #[derive(Default)]
  struct FakeStore {
    statements: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Vec<Row>>>,
    fail: bool,
  }

  impl FakeStore {
    fn respond(&self, rows: Vec<Value>) {
      let rows = rows
        .into_iter()
        .filter_map(|v| match v {
          Value::Object(row) => Some(row),
          _ => None,
        })
        .collect();
      self.responses.lock().unwrap().push_back(rows);
    }

    fn statements(&self) -> Vec<String> {
      self.statements.lock().unwrap().clone()
    }
  }

  impl StoreClient for FakeStore {
    fn insert(&self, _sql: &str, _body: Vec<u8>) -> Result<()> {
      Ok(())
    }

    fn query(&self, sql: &str) -> Result<Vec<Row>> {
      self.statements.lock().unwrap().push(sql.to_string());
      if self.fail {
        return Err(LogixError::Query("store unreachable".to_string()));
      }
      Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
  }

  fn run_reader(store: &Arc<FakeStore>) -> RunLogReader {
    RunLogReader::new(Arc::clone(store) as Arc<dyn StoreClient>, "logix")
  }

  fn log_row(dt: i64, seq: u64) -> Value {
    json!({
      "seq": seq,
      "log_level": 4,
      "dt": dt,
      "app_name": "orders",
      "env": "prod",
      "server_ip": "10.0.0.7",
      "method_name": "place",
      "content": "slow downstream",
      "class_name": "orders::api",
      "thread_name": "worker-1",
      "trace_id": "",
    })
  }

  #[test]
  fn test_quote_escapes_backslash_and_quote() {
    assert_eq!(quote("plain"), "'plain'");
    assert_eq!(quote("it's"), "'it\\'s'");
    assert_eq!(quote("a\\' OR 1=1"), "'a\\\\\\' OR 1=1'");
  }

  #[test]
  fn test_query_logs_builds_filtered_descending_statement() {
    let store = Arc::new(FakeStore::default());
    let reader = run_reader(&store);
    let criteria = LogFilterCriteria {
      app_name: Some("orders".to_string()),
      env: Some("  ".to_string()),
      level: Some("warn".to_string()),
      keyword: Some("O'Brien".to_string()),
      start_time: Some(1_000),
      end_time: Some(2_000),
      ..Default::default()
    };

    reader.query_logs(&criteria, 100, 50).unwrap();

    let sql = &store.statements()[0];
    assert!(sql.starts_with("SELECT seq, toInt8(log_level) AS log_level"));
    assert!(sql.contains("FROM logix.run_logs WHERE 1=1"));
    assert!(sql.contains("AND app_name = 'orders'"));
    assert!(!sql.contains("env ="), "blank filters add no predicate: {}", sql);
    assert!(sql.contains("AND log_level = 4"));
    assert!(sql.contains("AND event_time >= toDateTime64(1000 / 1000, 3)"));
    assert!(sql.contains("AND event_time <= toDateTime64(2000 / 1000, 3)"));
    assert!(sql.contains("positionCaseInsensitive(content, 'O\\'Brien') > 0"));
    assert!(sql.ends_with("ORDER BY event_time DESC, seq DESC LIMIT 50 OFFSET 100"));
  }

  #[test]
  fn test_unknown_level_is_ignored_and_zero_offset_omitted() {
    let store = Arc::new(FakeStore::default());
    let criteria = LogFilterCriteria {
      level: Some("LOUD".to_string()),
      ..Default::default()
    };
    run_reader(&store).query_logs(&criteria, 0, 10).unwrap();

    let sql = &store.statements()[0];
    assert!(!sql.contains("log_level ="));
    assert!(sql.ends_with("LIMIT 10"));
  }

  #[test]
  fn test_poll_uses_strict_cursor_and_ascending_order() {
    let store = Arc::new(FakeStore::default());
    let reader = run_reader(&store);
    let mut criteria = LogFilterCriteria {
      cursor_dt: Some(1_700_000_000_500),
      cursor_seq: Some(42),
      ..Default::default()
    };
    reader.poll_logs(&criteria, 200).unwrap();

    criteria.cursor_seq = None;
    reader.poll_logs(&criteria, 200).unwrap();

    let statements = store.statements();
    assert!(statements[0]
      .contains("AND (event_time, seq) > (toDateTime64(1700000000500 / 1000, 3), 42)"));
    assert!(statements[0].ends_with("ORDER BY event_time ASC, seq ASC LIMIT 200"));
    assert!(!statements[1].contains("(event_time, seq) >"), "half a cursor is no cursor");
  }

  #[test]
  fn test_rows_map_to_records() {
    let store = Arc::new(FakeStore::default());
    let mut row = log_row(1_700_000_000_123, 9);
    row["dt"] = json!("1700000000123");
    row["trace_id"] = json!("ABC");
    store.respond(vec![row, log_row(5, 1)]);

    let records = run_reader(&store)
      .query_logs(&LogFilterCriteria::default(), 0, 10)
      .unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].dt, 1_700_000_000_123);
    assert_eq!(records[0].seq, 9);
    assert_eq!(records[0].level, "WARN");
    assert_eq!(records[0].method, "place");
    assert_eq!(records[0].trace_id.as_deref(), Some("ABC"));
    assert_eq!(records[1].trace_id, None);
  }

  #[test]
  fn test_count_and_distinct_lists() {
    let store = Arc::new(FakeStore::default());
    store.respond(vec![json!({"total": "1234"})]);
    store.respond(vec![json!({"app_name": "billing"}), json!({"app_name": "orders"})]);
    store.respond(vec![json!({"env": "prod"})]);
    let reader = run_reader(&store);

    assert_eq!(reader.query_count(&LogFilterCriteria::default()).unwrap(), 1234);
    assert_eq!(reader.query_app_names().unwrap(), vec!["billing", "orders"]);
    assert_eq!(reader.query_envs().unwrap(), vec!["prod"]);

    let statements = store.statements();
    assert_eq!(
      statements[0],
      "SELECT count() AS total FROM logix.run_logs WHERE 1=1"
    );
    assert_eq!(
      statements[1],
      "SELECT DISTINCT app_name FROM logix.run_logs ORDER BY app_name"
    );
    assert_eq!(
      statements[2],
      "SELECT DISTINCT env FROM logix.run_logs WHERE env != '' ORDER BY env"
    );
  }

  #[test]
  fn test_count_failure_surfaces_as_query_error() {
    let store = Arc::new(FakeStore {
      fail: true,
      ..Default::default()
    });
    let err = run_reader(&store)
      .query_count(&LogFilterCriteria::default())
      .unwrap_err();
    assert!(matches!(err, LogixError::Query(_)));

    let empty = Arc::new(FakeStore::default());
    assert!(matches!(
      run_reader(&empty).query_count(&LogFilterCriteria::default()),
      Err(LogixError::Query(_))
    ));
  }

  #[test]
  fn test_page_result_arithmetic() {
    let page: PageResult<u8> = PageResult::new(101, 2, 50, Vec::new());
    assert!(page.has_next);
    assert_eq!(page.total_pages, 3);

    let last: PageResult<u8> = PageResult::new(100, 2, 50, Vec::new());
    assert!(!last.has_next);
    assert_eq!(last.total_pages, 2);

    let empty: PageResult<u8> = PageResult::new(0, 1, 50, Vec::new());
    assert_eq!(empty.total_pages, 0);
  }

  #[test]
  fn test_service_pages_with_default_window() {
    let store = Arc::new(FakeStore::default());
    store.respond(vec![json!({"total": 120})]);
    store.respond(vec![log_row(10, 1)]);
    let service = LogQueryService::new(run_reader(&store));

    let request = LogQueryRequest {
      page_num: 3,
      page_size: 50,
      criteria: LogFilterCriteria {
        end_time: Some(10 * DEFAULT_WINDOW_MS),
        ..Default::default()
      },
    };
    let page = service.query_logs(&request).unwrap();

    assert_eq!(page.total, 120);
    assert_eq!(page.data.len(), 1);
    assert!(!page.has_next);
    let statements = store.statements();
    let start = 9 * DEFAULT_WINDOW_MS;
    assert!(statements[0].contains(&format!("event_time >= toDateTime64({} / 1000, 3)", start)));
    assert!(statements[1].ends_with("LIMIT 50 OFFSET 100"));
  }

  #[test]
  fn test_service_skips_page_fetch_past_the_end() {
    let store = Arc::new(FakeStore::default());
    store.respond(vec![json!({"total": 3})]);
    let service = LogQueryService::new(run_reader(&store));

    let request = LogQueryRequest {
      page_num: 2,
      ..Default::default()
    };
    let page = service.query_logs(&request).unwrap();

    assert!(page.data.is_empty());
    assert_eq!(store.statements().len(), 1);
  }

  #[test]
  fn test_realtime_poll_default_limit() {
    let store = Arc::new(FakeStore::default());
    let service = LogQueryService::new(run_reader(&store));
    service.poll_latest_logs(&LogRealtimeRequest::default()).unwrap();
    assert!(store.statements()[0].ends_with("LIMIT 200"));
  }

  #[test]
  fn test_request_json_uses_camel_case_and_defaults() {
    let request: LogQueryRequest =
      serde_json::from_str(r#"{"appName":"orders","cursorSeq":7}"#).unwrap();
    assert_eq!(request.page_num, 1);
    assert_eq!(request.page_size, 50);
    assert_eq!(request.criteria.app_name.as_deref(), Some("orders"));
    assert_eq!(request.criteria.cursor_seq, Some(7));
  }

  #[test]
  fn test_trace_query_builds_tree() {
    let store = Arc::new(FakeStore::default());
    let row = |method: &str, dt: i64, position: i64, depth: i64| {
      json!({
        "trace_id": "T1", "method_name": method, "dt": dt, "app_name": "orders",
        "server_ip": "10.0.0.7", "position": position, "depth": depth,
      })
    };
    store.respond(vec![
      row("a", 0, 1, 0),
      row("b", 10, 1, 1),
      row("b", 30, 2, 1),
      row("a", 100, 2, 0),
    ]);
    let reader = TraceLogReader::new(Arc::clone(&store) as Arc<dyn StoreClient>, "logix");
    let service = TraceQueryService::new(reader);

    let request = TraceQueryRequest {
      trace_id: "T1".to_string(),
      app_name: Some("orders".to_string()),
      start_time: Some(0),
      end_time: None,
    };
    let roots = service.query_trace(&request).unwrap();

    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].duration, 100);
    assert_eq!(roots[0].children[0].duration, 20);
    let sql = &store.statements()[0];
    assert!(sql.contains("FROM logix.trace_logs WHERE trace_id = 'T1'"));
    assert!(sql.contains("AND app_name = 'orders'"));
    assert!(sql.contains("AND event_time >= fromUnixTimestamp64Milli(0)"));
    assert!(sql.ends_with("ORDER BY event_time ASC"));
  }

  #[test]
  fn test_trace_query_requires_id() {
    let store = Arc::new(FakeStore::default());
    let reader = TraceLogReader::new(Arc::clone(&store) as Arc<dyn StoreClient>, "logix");
    let err = TraceQueryService::new(reader)
      .query_trace(&TraceQueryRequest::default())
      .unwrap_err();
    assert!(matches!(err, LogixError::InvalidArgument(_)));
    assert!(store.statements().is_empty());
  }
}
