#[cfg(test)]
mod __test__ {
  use crate::event::TracePosition;
  use crate::trace_tree::{build_trace_tree, TraceNode, TraceRow};

  fn row(position: TracePosition, method: &str, depth: Option<u32>, dt: i64) -> TraceRow {
    TraceRow {
      trace_id: "T".to_string(),
      method_name: method.to_string(),
      dt: Some(dt),
      app_name: "app".to_string(),
      server_ip: "10.0.0.1".to_string(),
      position: Some(position),
      depth,
    }
  }

  use TracePosition::{End, Start};

  fn shape(node: &TraceNode) -> String {
    if node.children.is_empty() {
      node.signature.clone()
    } else {
      let inner: Vec<String> = node.children.iter().map(shape).collect();
      format!("{}[{}]", node.signature, inner.join(","))
    }
  }

  #[test]
  fn test_nested_call_durations() {
    let rows = vec![
      row(Start, "a", Some(0), 100),
      row(Start, "b", Some(1), 110),
      row(End, "b", Some(1), 130),
      row(End, "a", Some(0), 200),
    ];
    let roots = build_trace_tree(&rows);

    assert_eq!(roots.len(), 1);
    let a = &roots[0];
    assert_eq!(a.signature, "a");
    assert_eq!(a.duration, 100);
    assert_eq!(a.children.len(), 1);
    let b = &a.children[0];
    assert_eq!(b.signature, "b");
    assert_eq!(b.duration, 20);
    assert_eq!((b.start_time, b.end_time), (Some(110), Some(130)));
  }

  #[test]
  fn test_client_depth_numbering_matches_by_signature() {
    // Depth grows on both entry and exit, so END depths never equal START depths.
    let rows = vec![
      row(Start, "a", Some(1), 0),
      row(Start, "b", Some(2), 5),
      row(End, "b", Some(3), 8),
      row(Start, "c", Some(4), 9),
      row(End, "c", Some(5), 12),
      row(End, "a", Some(6), 20),
    ];
    let roots = build_trace_tree(&rows);
    assert_eq!(roots.len(), 1);
    assert_eq!(shape(&roots[0]), "a[b,c]");
    assert_eq!(roots[0].duration, 20);
    assert_eq!(roots[0].children[1].duration, 3);
  }

  #[test]
  fn test_unclosed_start_has_zero_duration() {
    let rows = vec![row(Start, "a", Some(0), 500)];
    let roots = build_trace_tree(&rows);
    assert_eq!(roots[0].end_time, Some(500));
    assert_eq!(roots[0].duration, 0);
  }

  #[test]
  fn test_missing_inner_end_is_skipped_over() {
    let rows = vec![
      row(Start, "a", None, 0),
      row(Start, "b", None, 10),
      row(End, "a", None, 50),
    ];
    let roots = build_trace_tree(&rows);
    let a = &roots[0];
    assert_eq!(a.duration, 50);
    assert_eq!(a.depth, 0);
    let b = &a.children[0];
    assert_eq!(b.depth, 1);
    assert_eq!(b.end_time, Some(10));
    assert_eq!(b.duration, 0);
  }

  #[test]
  fn test_end_matches_on_depth_when_signature_differs() {
    let rows = vec![
      row(Start, "a", Some(0), 0),
      row(Start, "b", Some(1), 1),
      row(End, "renamed", Some(1), 4),
      row(End, "a", Some(0), 9),
    ];
    let roots = build_trace_tree(&rows);
    assert_eq!(roots[0].children[0].duration, 3);
    assert_eq!(roots[0].duration, 9);
  }

  #[test]
  fn test_roots_and_children_sorted_by_start() {
    let rows = vec![
      row(Start, "x", Some(0), 200),
      row(Start, "y", Some(1), 250),
      row(End, "y", Some(1), 260),
      row(End, "x", Some(0), 270),
      row(Start, "w", Some(0), 100),
      row(End, "w", Some(0), 150),
    ];
    let roots = build_trace_tree(&rows);
    let names: Vec<&str> = roots.iter().map(|n| n.signature.as_str()).collect();
    assert_eq!(names, vec!["w", "x"]);
  }

  #[test]
  fn test_stray_end_and_empty_input() {
    assert!(build_trace_tree(&[]).is_empty());
    assert!(build_trace_tree(&[row(End, "a", Some(0), 1)]).is_empty());
  }

  #[test]
  fn test_unknown_position_closes_like_end() {
    let mut unknown = row(End, "a", Some(0), 40);
    unknown.position = None;
    let roots = build_trace_tree(&[row(Start, "a", Some(0), 10), unknown]);
    assert_eq!(roots[0].duration, 30);
  }

  #[test]
  fn test_node_without_start_time_uses_latest_root_time() {
    let mut no_time = row(Start, "orphan", Some(0), 0);
    no_time.dt = None;
    let rows = vec![
      row(Start, "a", Some(0), 10),
      row(End, "a", Some(0), 90),
      no_time,
    ];
    let roots = build_trace_tree(&rows);
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[1].signature, "orphan");
    assert_eq!(roots[1].end_time, Some(90));
    assert_eq!(roots[1].duration, 0);
  }
}
