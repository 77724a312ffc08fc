//! The four statically-coded workflow DAGs.

use futures::future::try_join_all;
use serde_json::{json, Value};

use crate::dispatcher::Dispatcher;
use crate::error::{ControllerError, Result};

/// Dispatch one stage, unwrapped to a bare `Value` result. Workflow stages do
/// not request performance sampling; that is a property of the single-shot
/// `/dispatch` endpoint's denoising wrapper, not of DAG execution.
async fn call(dispatcher: &Dispatcher, function_name: &str, payload: Value) -> Result<Value> {
    dispatcher
        .dispatch(function_name, &payload, false, None)
        .await
        .map(|outcome| outcome.result)
}

/// Fan out `payloads` over `function_name` concurrently; a stage barrier
/// that waits for every sub-task and aborts the whole stage on first
/// failure.
async fn fan_out(dispatcher: &Dispatcher, function_name: &str, payloads: Vec<Value>) -> Result<Vec<Value>> {
    let futures = payloads
        .into_iter()
        .map(|payload| call(dispatcher, function_name, payload));
    try_join_all(futures).await
}

fn field<'a>(value: &'a Value, key: &str) -> Result<&'a Value> {
    value
        .get(key)
        .ok_or_else(|| ControllerError::WorkflowStageError(format!("missing field '{key}'")))
}

fn field_str<'a>(value: &'a Value, key: &str) -> Result<&'a str> {
    field(value, key)?
        .as_str()
        .ok_or_else(|| ControllerError::WorkflowStageError(format!("field '{key}' is not a string")))
}

fn field_array<'a>(value: &'a Value, key: &str) -> Result<&'a Vec<Value>> {
    field(value, key)?
        .as_array()
        .ok_or_else(|| ControllerError::WorkflowStageError(format!("field '{key}' is not an array")))
}

/// `split(video_name, segment_time) -> split_keys[]`; fan-out
/// `transcode(split_file, target_type)`; `merge(transcoded_files, ...) -> final_video`.
pub async fn run_video(dispatcher: &Dispatcher, payload: Value) -> Result<Value> {
    let video_name = field_str(&payload, "video_name")?.to_string();
    let segment_time = field(&payload, "segment_time")?.clone();
    let target_type = field(&payload, "target_type")?.clone();
    let output_prefix = field(&payload, "output_prefix")?.clone();

    let split_result = call(
        dispatcher,
        "split",
        json!({ "video_name": video_name, "segment_time": segment_time }),
    )
    .await?;
    let split_keys = field_array(&split_result, "split_keys")?.clone();

    let transcode_payloads = split_keys
        .into_iter()
        .map(|split_file| json!({ "split_file": split_file, "target_type": target_type }))
        .collect();
    let transcoded = fan_out(dispatcher, "transcode", transcode_payloads).await?;

    let transcoded_files: Vec<Value> = transcoded
        .iter()
        .map(|r| field(r, "transcoded_file").cloned())
        .collect::<Result<_>>()?;

    call(
        dispatcher,
        "merge",
        json!({
            "transcoded_files": transcoded_files,
            "target_type": target_type,
            "output_prefix": output_prefix,
            "video_name": video_name,
        }),
    )
    .await
}

/// `upload(image_filename) -> image_path`; fan-out of 3 over
/// {adult, violence, extract}; from `extract.text`, fan-out of 2 over
/// {censor, translate}; combine `illegal` with boolean OR; conditional
/// `mosaic`.
pub async fn run_recognizer(dispatcher: &Dispatcher, payload: Value) -> Result<Value> {
    let image_filename = field(&payload, "image_filename")?.clone();

    let upload_result = call(dispatcher, "upload", json!({ "image_filename": image_filename })).await?;
    let image_path = field(&upload_result, "image_path")?.clone();

    // This fan-out has heterogeneous targets (adult, violence, extract),
    // unlike the other workflows' homogeneous fan-outs, so it is driven
    // directly with try_join! rather than through `fan_out`.
    let first_stage = json!({ "image_path": image_path });
    let (adult, violence, extract) = tokio::try_join!(
        call(dispatcher, "adult", first_stage.clone()),
        call(dispatcher, "violence", first_stage.clone()),
        call(dispatcher, "extract", first_stage.clone()),
    )?;

    let text = field(&extract, "text")?.clone();
    let second_stage = json!({ "text": text });
    let (censor, translate) = tokio::try_join!(
        call(dispatcher, "censor", second_stage.clone()),
        call(dispatcher, "translate", second_stage),
    )?;

    // `translate` participates in the stage barrier but contributes no
    // illegal flag of its own.
    let _ = translate;
    let illegal = [&adult, &violence, &censor]
        .iter()
        .any(|r| r.get("illegal").and_then(|v| v.as_bool()).unwrap_or(false));

    if illegal {
        let mosaic_result = call(dispatcher, "mosaic", json!({ "image_path": image_path })).await?;
        let mosaic_image_path = field(&mosaic_result, "mosaic_image_path")?.clone();
        Ok(json!({ "image_path": mosaic_image_path }))
    } else {
        Ok(json!({ "image_path": image_path }))
    }
}

/// `svd_start(row_num, col_num, slice_num) -> slice_paths[]`; fan-out
/// `svd_compute(slice_path, mat_index)`; `svd_merge(results) -> final_{u,s,v}_path`.
pub async fn run_svd(dispatcher: &Dispatcher, payload: Value) -> Result<Value> {
    let row_num = field(&payload, "row_num")?.clone();
    let col_num = field(&payload, "col_num")?.clone();
    let slice_num = field(&payload, "slice_num")?.clone();

    let start_result = call(
        dispatcher,
        "svd_start",
        json!({ "row_num": row_num, "col_num": col_num, "slice_num": slice_num }),
    )
    .await?;
    let slice_paths = field_array(&start_result, "slice_paths")?.clone();

    let compute_payloads = slice_paths
        .into_iter()
        .enumerate()
        .map(|(mat_index, slice_path)| json!({ "slice_path": slice_path, "mat_index": mat_index }))
        .collect();
    let results = fan_out(dispatcher, "svd_compute", compute_payloads).await?;

    call(dispatcher, "svd_merge", json!({ "results": results })).await
}

/// `wordcount_start(input_filename, slice_num) -> chunk_paths[]`; fan-out
/// `wordcount_count(chunk_path)`; `wordcount_merge(result_paths) -> final_word_count`.
pub async fn run_wordcount(dispatcher: &Dispatcher, payload: Value) -> Result<Value> {
    let input_filename = field(&payload, "input_filename")?.clone();
    let slice_num = field(&payload, "slice_num")?.clone();

    let start_result = call(
        dispatcher,
        "wordcount_start",
        json!({ "input_filename": input_filename, "slice_num": slice_num }),
    )
    .await?;
    let chunk_paths = field_array(&start_result, "chunk_paths")?.clone();

    let count_payloads = chunk_paths
        .into_iter()
        .map(|chunk_path| json!({ "chunk_path": chunk_path }))
        .collect();
    let counted = fan_out(dispatcher, "wordcount_count", count_payloads).await?;

    let result_paths: Vec<Value> = counted
        .iter()
        .map(|r| field(r, "result_path").cloned())
        .collect::<Result<_>>()?;

    call(dispatcher, "wordcount_merge", json!({ "result_paths": result_paths })).await
}
