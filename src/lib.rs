//! Quill - 角色卡与世界书的自主创作智能体
//!
//! 模块划分：
//! - **agent**: 运行时组件构建（LLM、会话存储、工具注册表）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话状态、生成产物
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / 脚本化）
//! - **memory**: 消息日志、会话存储（内存 / 文件）、token 估算
//! - **observability**: 日志初始化
//! - **react**: 决策解析、任务分解与调整、执行循环、完成判定、失败复盘
//! - **tools**: Tool trait、注册表、执行器与内置创作工具

pub mod agent;
pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use agent::Agent;
