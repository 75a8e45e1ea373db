#[cfg(test)]
mod __test__ {
  use crate::event::{
    Category, EventHeader, LogEvent, LogLevel, RunLogEvent, TraceLogEvent, TracePosition,
  };
  use crate::transport::{RUN_TOPIC, TRACE_TOPIC};

  fn header() -> EventHeader {
    EventHeader {
      event_time: 1_760_000_000_123,
      app_name: "orders".to_string(),
      env: "prod".to_string(),
      server_ip: "10.0.0.7".to_string(),
      method_name: "checkout".to_string(),
      trace_id: Some("1A2B".to_string()),
    }
  }

  #[test]
  fn test_level_ordering() {
    assert!(LogLevel::Trace < LogLevel::Debug);
    assert!(LogLevel::Debug < LogLevel::Info);
    assert!(LogLevel::Info < LogLevel::Warn);
    assert!(LogLevel::Warn < LogLevel::Error);
  }

  #[test]
  fn test_level_codes_and_names() {
    for level in [
      LogLevel::Trace,
      LogLevel::Debug,
      LogLevel::Info,
      LogLevel::Warn,
      LogLevel::Error,
    ] {
      assert_eq!(LogLevel::from_code(level.code()), Some(level));
      assert_eq!(LogLevel::parse(level.as_str()), Some(level));
    }
    assert_eq!(LogLevel::parse("warn"), Some(LogLevel::Warn));
    assert_eq!(LogLevel::parse("fatal"), None);
    assert_eq!(LogLevel::from_code(0), None);
  }

  #[test]
  fn test_category_topics() {
    assert_eq!(Category::Run.topic(), RUN_TOPIC);
    assert_eq!(Category::Trace.topic(), TRACE_TOPIC);
    assert_eq!(Category::from_topic(RUN_TOPIC), Category::Run);
    assert_eq!(Category::from_topic(TRACE_TOPIC), Category::Trace);
    assert_eq!(Category::from_topic("something-else"), Category::Trace);
  }

  #[test]
  fn test_run_event_json_uses_camel_case() {
    let event = LogEvent::Run(RunLogEvent {
      header: header(),
      seq: 42,
      log_level: LogLevel::Warn,
      content: "payment slow".to_string(),
      class_name: "orders::payment".to_string(),
      thread_name: "worker-1".to_string(),
    });

    let json = event.to_json().unwrap();
    assert!(json.contains("\"eventTime\":1760000000123"));
    assert!(json.contains("\"appName\":\"orders\""));
    assert!(json.contains("\"serverIp\":\"10.0.0.7\""));
    assert!(json.contains("\"logLevel\":\"WARN\""));
    assert!(json.contains("\"traceId\":\"1A2B\""));
    assert!(!json.contains("position"));

    let parsed = LogEvent::from_json(Category::Run, &json).unwrap();
    assert_eq!(parsed, event);
  }

  #[test]
  fn test_trace_event_accepts_compact_markers() {
    let json = r#"{"eventTime":5,"appName":"a","position":"<","depth":3,"methodName":"m"}"#;
    match LogEvent::from_json(Category::Trace, json).unwrap() {
      LogEvent::Trace(ev) => {
        assert_eq!(ev.position, TracePosition::Start);
        assert_eq!(ev.depth, 3);
        assert_eq!(ev.header.env, "");
        assert_eq!(ev.header.trace_id, None);
      },
      other => panic!("unexpected variant: {:?}", other),
    }

    let end = r#"{"eventTime":6,"appName":"a","position":"END"}"#;
    match LogEvent::from_json(Category::Trace, end).unwrap() {
      LogEvent::Trace(ev) => assert_eq!(ev.position, TracePosition::End),
      other => panic!("unexpected variant: {:?}", other),
    }
  }

  #[test]
  fn test_run_event_defaults_missing_fields() {
    let json = r#"{"eventTime":1,"appName":"a","extra":"ignored"}"#;
    match LogEvent::from_json(Category::Run, json).unwrap() {
      LogEvent::Run(ev) => {
        assert_eq!(ev.log_level, LogLevel::Info);
        assert_eq!(ev.seq, 0);
        assert_eq!(ev.content, "");
      },
      other => panic!("unexpected variant: {:?}", other),
    }
  }

  #[test]
  fn test_malformed_payload_is_an_error() {
    assert!(LogEvent::from_json(Category::Run, "not json").is_err());
    assert!(LogEvent::from_json(Category::Run, r#"{"appName":"a"}"#).is_err());
    assert!(LogEvent::from_json(Category::Trace, r#"{"eventTime":1,"appName":"a"}"#).is_err());
  }

  #[test]
  fn test_display_prefixes_category() {
    let event = LogEvent::from(TraceLogEvent {
      header: header(),
      position: TracePosition::End,
      depth: 2,
    });
    let shown = format!("{}", event);
    assert!(shown.starts_with("TRACE({"));
    assert!(shown.contains("\"position\":\"END\""));
  }
}
