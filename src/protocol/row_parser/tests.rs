use super::*;
use futures_util::stream;

fn body(text: &str) -> impl Stream<Item = AceQLResult<Vec<u8>>> + Unpin {
    // split into small chunks so every test also exercises chunk boundaries
    let chunks: Vec<AceQLResult<Vec<u8>>> = text.as_bytes().chunks(7).map(|c| Ok(c.to_vec())).collect();
    stream::iter(chunks)
}

const TWO_ROWS: &str = r#"{
  "status":"OK",
  "column_types":["INTEGER","VARCHAR","TIMESTAMP"],
  "query_rows":[
    {"row_1":[{"customer_id":"1"},{"name":"Smith"},{"created":"NULL"}]},
    {"row_2":[{"customer_id":"2"},{"name":"Jones"},{"created":"1700000000000"}]}
  ],
  "row_count":2
}"#;

#[tokio::test]
async fn reads_rows_in_order() {
    let mut p = RowParser::open(body(TWO_ROWS), 200).await.unwrap();
    assert_eq!(p.column_types(), &["INTEGER".to_string(), "VARCHAR".to_string(), "TIMESTAMP".to_string()]);
    assert!(p.columns().is_none());

    let r1 = p.read_row(1).await.unwrap().expect("row 1");
    assert_eq!(r1.number(), 1);
    assert_eq!(r1.value(0).unwrap(), Some("1"));
    assert_eq!(r1.value_by_name("name").unwrap(), Some("Smith"));
    assert!(r1.is_null(2).unwrap());

    let r2 = p.next_row().await.unwrap().expect("row 2");
    assert_eq!(r2.value_by_name("CREATED").unwrap(), Some("1700000000000"));
    assert!(Arc::ptr_eq(&r2.columns, p.columns().unwrap()), "column index is built once and shared");

    assert!(p.next_row().await.unwrap().is_none());
    assert_eq!(p.row_count(), Some(2));
    assert!(p.is_exhausted());
}

#[tokio::test]
async fn zero_rows_is_not_an_error() {
    let text = r#"{"status":"OK","column_types":[],"query_rows":[],"row_count":0}"#;
    let mut p = RowParser::open(body(text), 200).await.unwrap();
    assert!(p.read_row(1).await.unwrap().is_none());
    assert_eq!(p.row_count(), Some(0));
    assert_eq!(RowCounter::count(body(text)).await.unwrap(), 0);
}

#[tokio::test]
async fn column_named_row_count_is_data_not_sentinel() {
    let text = r#"{"status":"OK","column_types":["INTEGER","INTEGER"],"query_rows":[
        {"row_1":[{"row_count":"77"},{"row_2":"5"}]},
        {"row_2":[{"row_count":"78"},{"row_2":"6"}]},
        {"row_3":[{"row_count":"79"},{"row_2":"7"}]}
    ],"row_count":3}"#;
    let mut p = RowParser::open(body(text), 200).await.unwrap();
    let mut seen = Vec::new();
    while let Some(row) = p.next_row().await.unwrap() {
        seen.push(row.value_by_name("row_count").unwrap().unwrap().to_string());
        assert!(row.value_by_name("row_2").unwrap().is_some());
    }
    assert_eq!(seen, vec!["77", "78", "79"]);
    assert_eq!(p.row_count(), Some(3));
    assert_eq!(RowCounter::count(body(text)).await.unwrap(), 3);
}

#[tokio::test]
async fn read_row_skips_forward() {
    let mut p = RowParser::open(body(TWO_ROWS), 200).await.unwrap();
    let r2 = p.read_row(2).await.unwrap().expect("row 2");
    assert_eq!(r2.value(1).unwrap(), Some("Jones"));
    assert_eq!(r2.columns().name(0), Some("customer_id"));
    assert_eq!(p.cursor(), 2);
}

#[tokio::test]
async fn cursor_is_forward_only() {
    let mut p = RowParser::open(body(TWO_ROWS), 200).await.unwrap();
    p.read_row(2).await.unwrap();
    assert!(matches!(p.read_row(1).await, Err(AceQLError::Argument(_))));
    assert!(matches!(p.read_row(0).await, Err(AceQLError::Argument(_))));
}

#[tokio::test]
async fn row_past_the_end_is_none() {
    let mut p = RowParser::open(body(TWO_ROWS), 200).await.unwrap();
    assert!(p.read_row(5).await.unwrap().is_none());
    assert_eq!(p.row_count(), Some(2));
}

#[tokio::test]
async fn fail_status_in_stream_is_protocol_error() {
    let text = r#"{"status":"FAIL","error_type":2,"error_message":"ERROR: relation \"nope\" does not exist","stack_trace":"org.postgresql..."}"#;
    let err = RowParser::open(body(text), 200).await.err().expect("error");
    let p = err.as_protocol().expect("protocol error");
    assert_eq!(p.code, 2);
    assert!(p.message.contains("does not exist"));
    assert!(p.remote_stack_trace.is_some());
    assert!(RowCounter::count(body(text)).await.is_err());
}

#[tokio::test]
async fn json_null_and_numbers_in_cells() {
    let text = r#"{"status":"OK","query_rows":[{"row_1":[{"a":null},{"b":12.5},{"c":true}]}],"row_count":1}"#;
    let mut p = RowParser::open(body(text), 200).await.unwrap();
    let r = p.next_row().await.unwrap().unwrap();
    assert_eq!(r.value(0).unwrap(), None);
    assert_eq!(r.value(1).unwrap(), Some("12.5"));
    assert_eq!(r.value(2).unwrap(), Some("true"));
    assert!(matches!(r.value(3), Err(AceQLError::Argument(_))));
    assert!(matches!(r.value_by_name("zzz"), Err(AceQLError::Argument(_))));
}

#[tokio::test]
async fn truncated_stream_is_protocol_error() {
    let text = r#"{"status":"OK","query_rows":[{"row_1":[{"a":"1"}"#;
    let mut p = RowParser::open(body(text), 200).await.unwrap();
    let err = p.next_row().await.unwrap_err();
    assert_eq!(err.as_protocol().unwrap().code, 0);
}

#[tokio::test]
async fn empty_body_is_protocol_error() {
    let err = RowParser::open(body(""), 500).await.err().unwrap();
    assert_eq!(err.as_protocol().unwrap().http_status, Some(500));
}

#[tokio::test]
async fn counter_without_trailer_counts_rows() {
    let text = r#"{"status":"OK","query_rows":[{"row_1":[{"a":"1"}]},{"row_2":[{"a":"2"}]}]}"#;
    assert_eq!(RowCounter::count(body(text)).await.unwrap(), 2);
}
