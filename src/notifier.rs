use async_trait::async_trait;
use rusoto_sns::{PublishInput, Sns, SnsClient};

use crate::error::ReaperError;

const REPORT_HEADER: &str = "Here is the Idle Resource Remediation Report for all regions:";
const SUBJECT: &str = "Idle resource remediation report";

/// One line of the run's notification.
#[derive(Debug, PartialEq, Clone)]
pub struct Finding {
    pub region: String,
    pub message: String,
}

impl Finding {
    pub fn new(region: &str, message: String) -> Self {
        Finding {
            region: region.to_string(),
            message,
        }
    }
}

#[derive(Debug, Default)]
pub struct Report {
    findings: Vec<Finding>,
}

impl Report {
    pub fn extend<I: IntoIterator<Item = Finding>>(&mut self, findings: I) {
        self.findings.extend(findings);
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// `None` when there is nothing to report.
    pub fn render(&self) -> Option<String> {
        if self.findings.is_empty() {
            return None;
        }
        let mut lines = vec![REPORT_HEADER.to_string()];
        lines.extend(
            self.findings
                .iter()
                .map(|finding| format!("Region: {}, {}", finding.region, finding.message)),
        );
        Some(lines.join("\n"))
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, message: &str) -> Result<(), ReaperError>;
}

pub struct SnsNotifier {
    client: SnsClient,
    topic_arn: String,
}

impl SnsNotifier {
    pub fn new_with_client(client: SnsClient, topic_arn: &str) -> Self {
        SnsNotifier {
            client,
            topic_arn: topic_arn.to_string(),
        }
    }
}

#[async_trait]
impl Notifier for SnsNotifier {
    async fn publish(&self, message: &str) -> Result<(), ReaperError> {
        self.client
            .publish(PublishInput {
                topic_arn: Some(self.topic_arn.clone()),
                subject: Some(SUBJECT.to_string()),
                message: message.to_string(),
                ..PublishInput::default()
            })
            .await
            .map_err(|error| ReaperError::Notify(error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusoto_mock::{MockCredentialsProvider, MockRequestDispatcher};

    #[test]
    fn test_empty_report_renders_nothing() {
        assert_eq!(Report::default().render(), None);
    }

    #[test]
    fn test_render_one_line_per_finding() {
        let mut report = Report::default();
        report.extend(vec![
            Finding::new("us-east-1", "Instance i-0abc: Stopped due to low utilization.".to_string()),
            Finding::new("eu-west-1", "RDS instance orders-db is running again.".to_string()),
        ]);

        assert_eq!(report.len(), 2);
        assert_eq!(
            report.render().unwrap(),
            "Here is the Idle Resource Remediation Report for all regions:\n\
             Region: us-east-1, Instance i-0abc: Stopped due to low utilization.\n\
             Region: eu-west-1, RDS instance orders-db is running again."
        );
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let client = SnsClient::new_with(
            MockRequestDispatcher::with_status(403).with_body(
                "<ErrorResponse><Error><Type>Sender</Type><Code>AuthorizationError</Code>\
                 <Message>not authorized</Message></Error></ErrorResponse>",
            ),
            MockCredentialsProvider,
            Default::default(),
        );
        let notifier = SnsNotifier::new_with_client(client, "arn:aws:sns:us-east-1:123456789012:reaper");

        let result = notifier.publish("report").await;

        assert!(matches!(result, Err(ReaperError::Notify(_))));
    }
}
