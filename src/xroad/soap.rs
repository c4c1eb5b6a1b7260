use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::config::{MonitoringClient, SecurityServerConfig};
use crate::error::CollectorError;
use crate::identity::ServerIdentity;
use crate::schema::FetchBatch;
use crate::util::xml_escape;

use super::adapter::BatchFetcher;
use super::attachment::decode_response;

/// X-Road SOAP fetcher
///
/// Sends `getSecurityServerOperationalData` through the local security
/// server, which forwards it to the target server.
///
/// DESIGN PRINCIPLES:
/// - Pure protocol translation only
/// - No cursor or storage logic
///
/// Global configuration signatures are not verified.
pub struct SoapFetcher {
    http: reqwest::Client,
    url: String,
    client: MonitoringClient,
}

impl SoapFetcher {
    pub fn new(cfg: &SecurityServerConfig, timeout: Duration) -> Result<Self, CollectorError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            url: cfg.url.clone(),
            client: cfg.client.clone(),
        })
    }

    /// Builds the SOAP envelope for one query.
    ///
    /// The service and security server headers both address the target
    /// server's owner; `request_id` must be unique per message.
    pub fn build_envelope(
        &self,
        identity: &ServerIdentity,
        request_id: &str,
        records_from: &str,
        records_to: i64,
    ) -> String {
        let c = &self.client;
        let instance = xml_escape(identity.x_road_instance());
        let member_class = xml_escape(identity.member_class());
        let member_code = xml_escape(identity.member_code());

        format!(
            r#"<SOAP-ENV:Envelope
       xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/"
       xmlns:id="http://x-road.eu/xsd/identifiers"
       xmlns:xrd="http://x-road.eu/xsd/xroad.xsd"
       xmlns:om="http://x-road.eu/xsd/op-monitoring.xsd">
    <SOAP-ENV:Header>
        <xrd:client id:objectType="SUBSYSTEM">
            <id:xRoadInstance>{client_instance}</id:xRoadInstance>
            <id:memberClass>{client_class}</id:memberClass>
            <id:memberCode>{client_code}</id:memberCode>
            <id:subsystemCode>{client_subsystem}</id:subsystemCode>
        </xrd:client>
        <xrd:service id:objectType="SERVICE">
            <id:xRoadInstance>{instance}</id:xRoadInstance>
            <id:memberClass>{member_class}</id:memberClass>
            <id:memberCode>{member_code}</id:memberCode>
            <id:serviceCode>getSecurityServerOperationalData</id:serviceCode>
        </xrd:service>
        <xrd:securityServer id:objectType="SERVER">
            <id:xRoadInstance>{instance}</id:xRoadInstance>
            <id:memberClass>{member_class}</id:memberClass>
            <id:memberCode>{member_code}</id:memberCode>
            <id:serverCode>{server_code}</id:serverCode>
        </xrd:securityServer>
        <xrd:id>{request_id}</xrd:id>
        <xrd:protocolVersion>4.0</xrd:protocolVersion>
    </SOAP-ENV:Header>
    <SOAP-ENV:Body>
        <om:getSecurityServerOperationalData>
            <om:searchCriteria>
                <om:recordsFrom>{records_from}</om:recordsFrom>
                <om:recordsTo>{records_to}</om:recordsTo>
            </om:searchCriteria>
        </om:getSecurityServerOperationalData>
    </SOAP-ENV:Body>
</SOAP-ENV:Envelope>
"#,
            client_instance = xml_escape(&c.instance),
            client_class = xml_escape(&c.member_class),
            client_code = xml_escape(&c.member_code),
            client_subsystem = xml_escape(&c.subsystem_code),
            server_code = xml_escape(identity.server_code()),
            request_id = request_id,
            records_from = xml_escape(records_from),
            records_to = records_to,
        )
    }
}

#[async_trait::async_trait]
impl BatchFetcher for SoapFetcher {
    async fn fetch_batch(
        &self,
        identity: &ServerIdentity,
        records_from: &str,
        records_to: i64,
    ) -> Result<FetchBatch, CollectorError> {
        let request_id = Uuid::new_v4().to_string();
        let body = self.build_envelope(identity, &request_id, records_from, records_to);

        let response = self
            .http
            .post(&self.url)
            .header(CONTENT_TYPE, "text/xml;charset=UTF-8")
            .body(body)
            .send()
            .await?
            .error_for_status()?;

        let bytes = response.bytes().await?;
        decode_response(&bytes)
    }
}
