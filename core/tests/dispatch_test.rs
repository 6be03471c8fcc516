mod common;

use common::*;
use parley_core::{
    CurrentTimeTool, FnTool, FunctionCallRequest, GenerateOptions, Message, ParleyError, Persona,
    PluginCatalog, ProviderId, ToolDispatchLoop, ToolError, ToolRegistry,
};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn counted_weather_tool(calls: Arc<AtomicUsize>) -> FnTool {
    FnTool::new("getWeather", "Weather for a city", move |args: Map<String, Value>| {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!(format!("Sunny in {}", args["city"].as_str().unwrap_or("?"))))
        }
    })
    .param("city", "City name")
}

fn assistant_tools(plugins: &PluginCatalog) -> ToolRegistry {
    ToolRegistry::load(&Persona::new("Assistant", "Be helpful"), plugins)
}

fn plugins_with(tool: FnTool) -> PluginCatalog {
    let mut plugins = PluginCatalog::new();
    plugins.register("Assistant", Arc::new(CurrentTimeTool::new()));
    plugins.register("Assistant", Arc::new(tool));
    plugins
}

#[tokio::test]
async fn missing_argument_is_rejected_before_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let factory = Arc::new(
        CountingFactory::all()
            .with_adapter(ScriptedAdapter::new(ProviderId::OpenAi, vec![Step::call("getWeather", "{}")])),
    );
    let manager = manager_with(factory.clone());
    manager.switch_persona(
        &Persona::new("Assistant", ""),
        &plugins_with(counted_weather_tool(calls.clone())),
    );
    manager.switch_provider("openai").await.unwrap();

    let text = manager
        .generate_response(&[Message::user("weather?")], &GenerateOptions::default())
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(text.contains("getWeather"), "{}", text);
    assert!(text.contains("city"), "{}", text);
    // no continuation once the call was rejected
    assert_eq!(factory.adapter(ProviderId::OpenAi).call_count(), 1);
    assert_eq!(manager.dispatcher().stats().rejected_calls, 1);
}

#[tokio::test]
async fn null_argument_counts_as_missing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = assistant_tools(&plugins_with(counted_weather_tool(calls.clone())));
    let dispatcher = ToolDispatchLoop::default();

    let err = dispatcher
        .execute(&registry, &FunctionCallRequest::new("getWeather", r#"{"city": null}"#))
        .await
        .unwrap_err();
    assert_eq!(err, ToolError::MissingArguments(vec!["city".into()]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_arguments_report_missing_parameters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let registry = assistant_tools(&plugins_with(counted_weather_tool(calls.clone())));
    let dispatcher = ToolDispatchLoop::default();

    let err = dispatcher
        .execute(&registry, &FunctionCallRequest::new("getWeather", "{city: Oslo"))
        .await
        .unwrap_err();
    assert_eq!(err, ToolError::MissingArguments(vec!["city".into()]));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_function_yields_not_available_message() {
    let factory = Arc::new(CountingFactory::all().with_adapter(ScriptedAdapter::new(
        ProviderId::OpenAi,
        vec![Step::call("launchRocket", "{}")],
    )));
    let manager = manager_with(factory.clone());
    manager.switch_provider("openai").await.unwrap();

    let text = manager
        .generate_response(&[Message::user("go")], &GenerateOptions::default())
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();

    assert!(text.contains("launchRocket"));
    assert!(text.contains("not available"));
    assert_eq!(factory.adapter(ProviderId::OpenAi).call_count(), 1);
}

#[tokio::test]
async fn tool_failure_ends_the_turn_with_a_message() {
    let failing = FnTool::new("getWeather", "Weather", |_args: Map<String, Value>| async move {
        Err(ToolError::ExecutionFailed("upstream down".into()))
    })
    .param("city", "City name");

    let factory = Arc::new(CountingFactory::all().with_adapter(ScriptedAdapter::new(
        ProviderId::OpenAi,
        vec![Step::call("getWeather", r#"{"city":"Oslo"}"#)],
    )));
    let manager = manager_with(factory.clone());
    manager.switch_persona(&Persona::new("Assistant", ""), &plugins_with(failing));
    manager.switch_provider("openai").await.unwrap();

    let text = manager
        .generate_response(&[Message::user("weather in Oslo?")], &GenerateOptions::default())
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();

    assert!(text.contains("getWeather"));
    assert!(text.contains("upstream down"));
    assert_eq!(manager.dispatcher().stats().total_tool_errors, 1);
}

#[tokio::test]
async fn result_is_fed_back_for_continuation() {
    let factory = Arc::new(CountingFactory::all().with_adapter(ScriptedAdapter::new(
        ProviderId::OpenAi,
        vec![
            Step::call("getCurrentTime", "{}"),
            Step::text("It is late."),
        ],
    )));
    let manager = manager_with(factory.clone());
    manager.switch_persona(
        &Persona::new("Assistant", ""),
        &plugins_with(counted_weather_tool(Arc::new(AtomicUsize::new(0)))),
    );
    manager.switch_provider("openai").await.unwrap();

    let text = manager
        .generate_response(&[Message::user("what time is it?")], &GenerateOptions::default())
        .await
        .unwrap()
        .into_text()
        .await
        .unwrap();
    assert_eq!(text, "It is late.");

    let exposed: Vec<String> = factory.adapter(ProviderId::OpenAi).requests()[0]
        .functions
        .iter()
        .map(|f| f.name.clone())
        .collect();
    assert_eq!(exposed, vec!["getCurrentTime", "getWeather"]);

    let requests = factory.adapter(ProviderId::OpenAi).requests();
    assert_eq!(requests.len(), 2);
    let continuation = &requests[1].messages;
    assert_eq!(continuation[0], Message::user("what time is it?"));
    let note = continuation.last().unwrap();
    assert!(
        note.content.starts_with("Function getCurrentTime returned:"),
        "{}",
        note.content
    );
    assert!(!requests[1].stream);

    let stats = manager.dispatcher().stats();
    assert_eq!(stats.total_rounds, 1);
    assert_eq!(stats.total_tool_calls, 1);
}

#[tokio::test]
async fn chained_calls_stop_at_the_iteration_cap() {
    let steps = (0..10).map(|_| Step::call("getCurrentTime", "{}")).collect();
    let factory = Arc::new(
        CountingFactory::all().with_adapter(ScriptedAdapter::new(ProviderId::OpenAi, steps)),
    );
    let manager = manager_with(factory.clone());
    manager.switch_persona(
        &Persona::new("Assistant", ""),
        &plugins_with(counted_weather_tool(Arc::new(AtomicUsize::new(0)))),
    );
    manager.switch_provider("openai").await.unwrap();

    let err = manager
        .generate_response(&[Message::user("loop")], &GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::ToolLoopLimit(5)), "{:?}", err);
    // initial call plus one continuation per round
    assert_eq!(factory.adapter(ProviderId::OpenAi).call_count(), 6);
    assert_eq!(manager.dispatcher().stats().total_tool_calls, 5);
}

#[tokio::test]
async fn continuation_errors_propagate() {
    let factory = Arc::new(CountingFactory::all().with_adapter(ScriptedAdapter::new(
        ProviderId::OpenAi,
        vec![Step::call("getCurrentTime", "{}"), Step::Auth],
    )));
    let manager = manager_with(factory);
    manager.switch_persona(
        &Persona::new("Assistant", ""),
        &plugins_with(counted_weather_tool(Arc::new(AtomicUsize::new(0)))),
    );
    manager.switch_provider("openai").await.unwrap();

    let err = manager
        .generate_response(&[Message::user("time?")], &GenerateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ParleyError::Auth(_)));
}

#[test]
fn iteration_cap_is_at_least_one() {
    assert_eq!(ToolDispatchLoop::new(0).max_iterations(), 1);
    assert_eq!(ToolDispatchLoop::default().max_iterations(), 5);
}
