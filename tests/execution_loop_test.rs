//! 执行循环端到端测试：脚本化 LLM + 内存会话存储 + 全部内置工具

use std::sync::Arc;

use async_trait::async_trait;
use quill::config::AppConfig;
use quill::core::{AgentError, Session, SessionStatus, Task};
use quill::llm::ScriptedLlmClient;
use quill::memory::{MemorySessionStore, MessageKind, SessionStore};
use quill::react::{RunResult, UserInput};
use quill::tools::builtin_registry;
use quill::Agent;

const OBJECTIVE: &str = "a sci-fi detective story";

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.agent.pacing_delay_ms = 0;
    config.tools.tool_timeout_secs = 5;
    config
}

fn agent_with(llm: Arc<ScriptedLlmClient>) -> Agent {
    let config = test_config();
    let registry = builtin_registry(&config.tools);
    Agent::new(config, llm, Arc::new(MemorySessionStore::new()), registry)
}

/// 预置一个任务的会话（跳过任务分解）
async fn seeded(agent: &Agent, max_iterations: u32, subs: &[&str]) -> String {
    let mut session = Session::new(OBJECTIVE, max_iterations, 1_000_000);
    session.research.append_tasks(vec![Task::new(
        0,
        "塑造主角",
        "",
        subs.iter().map(|s| (s.to_string(), String::new())).collect(),
    )]);
    let id = session.id.clone();
    agent.store().insert(session).await.unwrap();
    id
}

fn call(tool: &str, params: &str) -> String {
    format!(
        "<think>推进当前子问题</think>\n\
         <task_adjustment><reasoning>保持</reasoning><task_description>no change</task_description></task_adjustment>\n\
         <action>{}</action>\n<parameters>{}</parameters>",
        tool, params
    )
}

fn supplement_entries(n: usize) -> String {
    let entries: Vec<String> = (0..n)
        .map(|i| format!(r#"{{"keys": ["地点{i}"], "comment": "地点{i}", "content": "雾港的第{i}个街区"}}"#))
        .collect();
    format!("<entries><![CDATA[[{}]]]></entries>", entries.join(", "))
}

struct FixedAnswer(Result<String, String>);

#[async_trait]
impl UserInput for FixedAnswer {
    async fn prompt(&self, _message: &str, _options: &[String]) -> Result<String, String> {
        self.0.clone()
    }
}

#[tokio::test]
async fn test_decomposition_covers_clarification_and_research() {
    let tasks: String = [
        "设计主角外貌",
        "确定主角性格",
        "撰写开场白",
        "编写状态栏",
        "构建世界观",
        "补充地点与人物",
    ]
    .iter()
    .map(|d| {
        format!(
            "<task><description>{d}</description><reasoning>r</reasoning>\
             <sub_problems><sub_problem>{d}：草稿</sub_problem><sub_problem>{d}：定稿</sub_problem></sub_problems></task>"
        )
    })
    .collect();
    let reply = format!(
        "<decomposition><existing_work><references>false</references><name>none</name></existing_work>\
         <creative_direction><clarity>partial</clarity><notes>基调未定</notes></creative_direction>\
         <tasks>{}</tasks></decomposition>",
        tasks
    );
    let llm = Arc::new(ScriptedLlmClient::new([reply]));
    let agent = agent_with(llm);
    let session = Session::new(OBJECTIVE, 1, 1_000_000);
    let id = session.id.clone();
    agent.store().insert(session).await.unwrap();

    let err = agent.execution_loop(&id).start(None).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(1)));

    let session = agent.store().get(&id).await.unwrap();
    let queue = &session.research.task_queue;
    assert!((5..=8).contains(&queue.len()), "got {} tasks", queue.len());
    let subs: Vec<&str> = queue
        .iter()
        .flat_map(|t| t.sub_problems.iter().map(|s| s.description.as_str()))
        .collect();
    assert!(subs.iter().any(|s| s.starts_with("Ask the user")));
    assert!(subs.iter().any(|s| s.starts_with("Search reference material")));
    assert!(session.research.insight.is_some());
    let ids: std::collections::HashSet<&str> = queue.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids.len(), queue.len());
}

#[tokio::test]
async fn test_no_decision_planner_stops_at_iteration_cap() {
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
    let agent = agent_with(llm.clone());
    let session = Session::new(OBJECTIVE, 5, 1_000_000);
    let id = session.id.clone();
    agent.store().insert(session).await.unwrap();

    let err = agent.execution_loop(&id).start(None).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(5)));

    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.execution.iteration, 5);
    assert_eq!(session.status, SessionStatus::Failed);
    // 1 次分解 + 5 次规划
    assert_eq!(llm.call_count(), 6);
    // 缺项提示不重复写入
    let notices = session
        .messages
        .iter()
        .filter(|m| m.kind == MessageKind::Notice && m.content.starts_with("Output incomplete"))
        .count();
    assert_eq!(notices, 1);
}

#[tokio::test]
async fn test_token_budget_is_distinct_terminal_error() {
    let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).with_tokens_per_call(50));
    let agent = agent_with(llm);
    let session = Session::new(OBJECTIVE, 10, 40);
    let id = session.id.clone();
    agent.store().insert(session).await.unwrap();

    let err = agent.execution_loop(&id).start(None).await.unwrap_err();
    assert!(matches!(err, AgentError::TokenBudgetExhausted { used: 50, budget: 40 }));
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.execution.iteration, 0);
}

#[tokio::test]
async fn test_ask_user_pauses_and_resume_completes_sub_problem_once() {
    let llm = Arc::new(ScriptedLlmClient::new([call(
        "ASK_USER",
        "<question>故事偏黑色电影还是赛博朋克？</question><options><![CDATA[[\"黑色电影\", \"赛博朋克\"]]]></options>",
    )]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 3, &["确认基调", "写外貌", "写性格"]).await;

    let result = agent.execution_loop(&id).start(None).await.unwrap();
    match result {
        RunResult::Paused { question, options } => {
            assert!(question.contains("黑色电影"));
            assert_eq!(options.len(), 2);
        }
        other => panic!("expected pause, got {:?}", other),
    }
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::WaitingUser);
    assert_eq!(session.research.active_sub_problem().unwrap().description, "确认基调");

    // 恢复后规划器无决策，直到迭代上限
    let err = agent
        .execution_loop(&id)
        .continue_execution(Some("黑色电影".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(3)));
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.research.active_sub_problem().unwrap().description, "写外貌");
    assert!(session
        .messages
        .iter()
        .any(|m| m.kind == MessageKind::UserAnswer && m.content == "黑色电影"));

    // FAILED 状态再次恢复不会再完成子问题
    let _ = agent.execution_loop(&id).continue_execution(None).await;
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.research.active_sub_problem().unwrap().description, "写外貌");
}

#[tokio::test]
async fn test_interactive_input_answers_inline() {
    let llm = Arc::new(ScriptedLlmClient::new([call(
        "ASK_USER",
        "<question>主角的性别？</question>",
    )]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 1, &["确认主角", "写外貌"]).await;

    let input: Arc<dyn UserInput> = Arc::new(FixedAnswer(Ok("女性".into())));
    let err = agent.execution_loop(&id).start(Some(input)).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(1)));
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.research.active_sub_problem().unwrap().description, "写外貌");
    assert!(session.messages.iter().any(|m| m.content == "女性"));
}

#[tokio::test]
async fn test_interactive_input_failure_is_fatal() {
    let llm = Arc::new(ScriptedLlmClient::new([call("ASK_USER", "<question>基调？</question>")]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 5, &["确认基调"]).await;

    let input: Arc<dyn UserInput> = Arc::new(FixedAnswer(Err("stdin closed".into())));
    let err = agent.execution_loop(&id).start(Some(input)).await.unwrap_err();
    assert!(matches!(err, AgentError::UserInput(_)));
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.execution.iteration, 1);
}

#[tokio::test]
async fn test_character_merge_keeps_untouched_fields_and_applies_adjustment() {
    let decision = "<think>先写外貌</think>\
        <task_adjustment><reasoning>拆细</reasoning><task_description>塑造雾港侦探</task_description>\
        <new_sub_problems><sub_problem>写外貌</sub_problem><sub_problem>写背景</sub_problem><sub_problem>写口癖</sub_problem></new_sub_problems>\
        </task_adjustment>\
        <action>CHARACTER</action>\
        <parameters><description>灰色风衣，左臂是旧式义体</description></parameters>";
    let llm = Arc::new(ScriptedLlmClient::new([decision]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 1, &["写设定", "写性格"]).await;
    {
        let mut session = agent.store().get(&id).await.unwrap();
        session.output.character_data.name = "Iris".into();
        session.output.character_data.personality = "冷静".into();
        agent.store().insert(session).await.unwrap();
    }

    let _ = agent.execution_loop(&id).start(None).await;
    let session = agent.store().get(&id).await.unwrap();
    let character = &session.output.character_data;
    assert_eq!(character.name, "Iris");
    assert_eq!(character.personality, "冷静");
    assert_eq!(character.description, "灰色风衣，左臂是旧式义体");

    // 调整把子问题改写为两条（不超过原数量），CHARACTER 成功后完成第一条
    let task = session.research.active_task().unwrap();
    assert_eq!(task.description, "塑造雾港侦探");
    assert_eq!(task.sub_problems.len(), 1);
    assert_eq!(task.sub_problems[0].description, "写背景");
}

#[tokio::test]
async fn test_tool_failure_is_analyzed_without_advancing() {
    let llm = Arc::new(ScriptedLlmClient::new([
        call(
            "SUPPLEMENT",
            r#"<entries><![CDATA[[{"content": "没有触发词的条目"}]]]></entries>"#,
        ),
        "<root_cause>条目缺少 keys</root_cause><parameter_issue>entries[0].keys 为空</parameter_issue><recommendation>为每个条目提供触发词</recommendation>".to_string(),
    ]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 1, &["写补充条目"]).await;

    let _ = agent.execution_loop(&id).start(None).await;
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.research.active_sub_problem().unwrap().description, "写补充条目");
    assert!(session.output.supplement_data.is_empty());
    let analysis = session
        .messages
        .iter()
        .find(|m| m.kind == MessageKind::FailureAnalysis)
        .unwrap();
    assert!(analysis.content.contains("entries[0].keys 为空"));
}

#[tokio::test]
async fn test_unknown_tool_goes_through_failure_analysis() {
    let llm = Arc::new(ScriptedLlmClient::new([call("TRANSLATE", "<text>hi</text>")]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 1, &["写设定"]).await;

    let _ = agent.execution_loop(&id).start(None).await;
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.research.active_sub_problem().unwrap().description, "写设定");
    // 复盘调用拿到兜底回复（<action>none</action>），原文当作根因
    assert!(session
        .messages
        .iter()
        .any(|m| m.kind == MessageKind::FailureAnalysis && m.content.contains("Unknown tool")));
}

#[tokio::test]
async fn test_four_supplements_leave_session_incomplete() {
    let llm = Arc::new(ScriptedLlmClient::new([call("SUPPLEMENT", &supplement_entries(4))]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 2, &["写补充条目"]).await;
    {
        let mut session = agent.store().get(&id).await.unwrap();
        let c = &mut session.output.character_data;
        c.name = "Iris".into();
        c.description = "义体侦探".into();
        c.personality = "冷静".into();
        c.scenario = "雨夜".into();
        c.first_mes = "又是你。".into();
        c.mes_example = "<START>".into();
        c.creator_notes = "慢热".into();
        c.tags = vec!["科幻".into()];
        c.alternate_greetings = vec!["门没锁。".into()];
        for category in [
            quill::core::WorldbookCategory::Status,
            quill::core::WorldbookCategory::UserSetting,
            quill::core::WorldbookCategory::WorldView,
        ] {
            session.output.overwrite_worldbook(
                category,
                vec![quill::core::WorldbookEntry::new(vec!["k".into()], "c", "正文")],
            );
        }
        agent.store().insert(session).await.unwrap();
    }

    let err = agent.execution_loop(&id).start(None).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(2)));
    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.output.filled_supplement_count(), 4);
    assert!(session.research.task_queue.is_empty());
    assert!(session
        .messages
        .iter()
        .any(|m| m.kind == MessageKind::Notice && m.content.contains("need 1 more")));
}

#[tokio::test]
async fn test_full_run_completes_when_structure_is_filled() {
    let character = "<name>Iris</name><description>雾港的义体侦探</description><personality>冷静，话少</personality>\
        <scenario>雨夜的事务所</scenario><first_mes>又是你。</first_mes><mes_example>&lt;START&gt; 说吧。</mes_example>\
        <creator_notes>慢热</creator_notes><tags><![CDATA[[\"科幻\", \"侦探\"]]]></tags>\
        <alternate_greetings><![CDATA[[\"门没锁。\"]]]></alternate_greetings>";
    // 最后一条 SUPPLEMENT 的数组被截断，由解析器补全
    let truncated = supplement_entries(5);
    let truncated = truncated.trim_end_matches("]]]></entries>").to_string();
    let llm = Arc::new(ScriptedLlmClient::new([
        call("CHARACTER", character),
        call("STATUS", "<content>时间：深夜｜地点：事务所｜好感：10</content>"),
        call("USER_SETTING", "<content>你是来委托案件的人</content><keys><![CDATA[[\"委托人\"]]]></keys>"),
        call("WORLD_VIEW", "<content>永夜笼罩的雾港，义体普及</content>"),
        call("SUPPLEMENT", &truncated),
    ]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 10, &["角色", "状态", "用户设定", "世界观", "补充"]).await;

    let result = agent.execution_loop(&id).start(None).await.unwrap();
    let report = match result {
        RunResult::Completed(report) => report,
        other => panic!("expected completion, got {:?}", other),
    };
    assert_eq!(report.iterations, 5);
    assert_eq!(report.completed_tasks, vec!["塑造主角"]);
    assert_eq!(report.output.character_data.tags, vec!["科幻", "侦探"]);
    assert_eq!(report.output.character_data.mes_example, "<START> 说吧。");
    assert_eq!(report.output.filled_supplement_count(), 5);
    let status = report.output.status_data.as_ref().unwrap();
    assert!(status.constant);
    assert_eq!(status.keys, vec!["status"]);

    let session = agent.store().get(&id).await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // 已完成的会话再次恢复直接返回汇总
    let again = agent.execution_loop(&id).continue_execution(None).await.unwrap();
    assert!(matches!(again, RunResult::Completed(_)));
}

#[tokio::test]
async fn test_reflect_and_complete_manage_queue() {
    let llm = Arc::new(ScriptedLlmClient::new([
        call(
            "REFLECT",
            r#"<new_tasks><![CDATA[[{"description": "补充配角", "sub_problems": ["列出配角"]}]]]></new_tasks>"#,
        ),
        call("COMPLETE", "<finished>true</finished><summary>提前收尾</summary>"),
    ]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 3, &["反思缺项", "写外貌"]).await;

    let err = agent.execution_loop(&id).start(None).await.unwrap_err();
    assert!(matches!(err, AgentError::IterationLimitReached(3)));
    let session = agent.store().get(&id).await.unwrap();
    // REFLECT 追加到队尾后 COMPLETE 清空队列；产物不完整，所以没有完成
    assert!(session.research.task_queue.is_empty());
    assert!(session
        .messages
        .iter()
        .any(|m| m.kind == MessageKind::ToolResult && m.content.contains("REFLECT appended 1 tasks")));
    assert_eq!(session.status, SessionStatus::Failed);
}

#[tokio::test]
async fn test_numeric_worldbook_parameters_reach_output() {
    let llm = Arc::new(ScriptedLlmClient::new([call(
        "WORLD_VIEW",
        "<content>2049 年的雾港</content><keys>2049</keys><comment>1984</comment>",
    )]));
    let agent = agent_with(llm);
    let id = seeded(&agent, 1, &["写世界观", "写补充条目"]).await;

    let _ = agent.execution_loop(&id).start(None).await;
    let session = agent.store().get(&id).await.unwrap();
    let world = session.output.world_view_data.as_ref().unwrap();
    assert_eq!(world.keys, vec!["2049"]);
    assert_eq!(world.comment, "1984");
    assert_eq!(world.content, "2049 年的雾港");
}
