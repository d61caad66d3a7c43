pub mod azure;
pub mod openai;

pub use azure::{AnalysisPollPolicy, AzureCredentials, AzureReadClient};
pub use openai::{OpenAiChatModel, OpenAiClient, OpenAiEmbedder};
