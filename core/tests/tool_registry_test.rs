use parley_core::{
    CurrentTimeTool, FnTool, Persona, PluginCatalog, Tool, ToolError, ToolRegistry,
};
use serde_json::{json, Map, Value};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn weather_tool() -> FnTool {
    FnTool::new("getWeather", "Weather for a city", |args: Map<String, Value>| async move {
        Ok(json!({
            "city": args["city"],
            "unit": args["unit"],
        }))
    })
    .param("city", "City name")
    .param_with_default("unit", "celsius or fahrenheit", json!("celsius"))
}

#[test]
fn missing_descriptor_file_yields_empty_list() {
    let persona = Persona::new("Assistant", "Be helpful").with_descriptors("/nonexistent/functions.json");
    let registry = ToolRegistry::load(&persona, &PluginCatalog::new());
    assert!(registry.descriptors().is_empty());
    assert!(registry.list_tools().is_empty());
    assert!(registry.is_empty());
}

#[test]
fn persona_without_descriptor_path_loads_bound_tools() {
    let mut plugins = PluginCatalog::new();
    plugins.register("Assistant", Arc::new(CurrentTimeTool::new()));
    let registry = ToolRegistry::load(&Persona::new("Assistant", ""), &plugins);

    assert!(registry.get("getCurrentTime").is_some());
    let descriptors = registry.descriptors();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].name, "getCurrentTime");
    assert!(descriptors[0].parameters["properties"].get("format").is_some());
    assert!(descriptors[0].required_param_names().is_empty());
}

#[test]
fn bound_tool_missing_from_descriptor_file_is_described() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("functions.json");
    fs::write(
        &path,
        json!([{"name": "getWeather", "description": "From file", "parameters": {
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }}])
        .to_string(),
    )
    .unwrap();

    let mut plugins = PluginCatalog::new();
    plugins.register("Assistant", Arc::new(weather_tool()));
    plugins.register("Assistant", Arc::new(CurrentTimeTool::new()));
    let registry = ToolRegistry::load(&Persona::new("Assistant", "").with_descriptors(path.clone()), &plugins);

    let descriptors = registry.descriptors();
    let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(names, vec!["getWeather", "getCurrentTime"]);
    // the file entry wins over the tool's own schema
    assert_eq!(descriptors[0].description, "From file");
}

#[test]
fn load_reads_descriptors_and_binds_persona_tools_only() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("functions.json");
    fs::write(
        &path,
        json!([
            {"name": "getWeather", "description": "Weather", "parameters": {
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }},
            {"type": "function", "function": {"name": "getCurrentTime", "parameters": {"type": "object", "properties": {}}}}
        ])
        .to_string(),
    )
    .unwrap();

    let mut plugins = PluginCatalog::new();
    plugins.register("Assistant", Arc::new(weather_tool()));
    plugins.register("Other", Arc::new(CurrentTimeTool::new()));

    let persona = Persona::new("Assistant", "").with_descriptors(path.clone());
    let registry = ToolRegistry::load(&persona, &plugins);

    let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
    assert_eq!(names, vec!["getWeather", "getCurrentTime"]);
    assert_eq!(registry.descriptors()[0].required_param_names(), vec!["city"]);
    assert!(registry.get("getWeather").is_some());
    // bound to another persona
    assert!(registry.get("getCurrentTime").is_none());
}

#[test]
fn required_params_exclude_defaults() {
    let mut plugins = PluginCatalog::new();
    plugins.register("Assistant", Arc::new(weather_tool()));
    let registry = ToolRegistry::load(&Persona::new("Assistant", ""), &plugins);
    assert_eq!(registry.required_params("getWeather"), Some(vec!["city".to_string()]));
    assert_eq!(registry.required_params("getCurrentTime"), None);
}

#[test]
fn schema_derived_params() {
    let tool = CurrentTimeTool::new();
    let params = tool.params();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].name, "format");
    assert!(!params[0].is_required());
}

#[tokio::test]
async fn register_exposes_descriptor_once() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(CurrentTimeTool::new())).await;
    registry.register(Arc::new(CurrentTimeTool::new())).await;
    assert_eq!(registry.descriptors().len(), 1);
    assert_eq!(registry.descriptors()[0].name, "getCurrentTime");
}

#[tokio::test]
async fn call_fills_defaults() {
    let registry = ToolRegistry::new();
    registry.register(Arc::new(weather_tool())).await;

    let mut args = Map::new();
    args.insert("city".into(), json!("Oslo"));
    let out = registry.call("getWeather", args).await.unwrap();
    assert_eq!(out, json!({"city": "Oslo", "unit": "celsius"}));
}

#[tokio::test]
async fn call_unknown_tool() {
    let registry = ToolRegistry::new();
    let err = registry.call("nope", Map::new()).await.unwrap_err();
    assert_eq!(err, ToolError::NotFound("nope".into()));
}

#[tokio::test]
async fn panicking_tool_is_contained() {
    let registry = ToolRegistry::new();
    let tool = FnTool::new("explode", "Always panics", |_args: Map<String, Value>| async move {
        if true {
            panic!("boom");
        }
        Ok(Value::Null)
    });
    registry.register(Arc::new(tool)).await;

    let err = registry.call("explode", Map::new()).await.unwrap_err();
    assert!(matches!(err, ToolError::Internal(_)), "got {:?}", err);
}

#[tokio::test(start_paused = true)]
async fn slow_tool_times_out() {
    let registry = ToolRegistry::new().with_timeout(Duration::from_secs(2));
    let tool = FnTool::new("slow", "Sleeps", |_args: Map<String, Value>| async move {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Value::Null)
    });
    registry.register(Arc::new(tool)).await;

    let err = registry.call("slow", Map::new()).await.unwrap_err();
    assert_eq!(err, ToolError::Timeout);
}

#[tokio::test]
async fn current_time_tool_formats() {
    let tool = CurrentTimeTool::new();
    let mut args = Map::new();
    args.insert("format".into(), json!("%Y"));
    let out = tool.call(args).await.unwrap();
    let year = out["time"].as_str().unwrap();
    assert_eq!(year.len(), 4);
    assert!(year.chars().all(|c| c.is_ascii_digit()));

    let mut bad = Map::new();
    bad.insert("format".into(), json!("%Q%"));
    assert!(matches!(
        tool.call(bad).await,
        Err(ToolError::InvalidArguments(_))
    ));
}
