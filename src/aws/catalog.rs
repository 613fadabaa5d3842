//! Built-in Service Catalog
//!
//! The read-only AWS operations an inventory may reference. Each entry is
//! registered as a typed invoker keyed by `(service, snake_case_operation)`.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::client::AwsHttpClient;
use super::protocol::{operation_name, Protocol};
use crate::error::{CallError, ConfigError};
use crate::scan::dispatcher::{InvokeRequest, Invoker, OperationRegistry};

/// One API operation. `path` is only meaningful for rest protocols.
#[derive(Debug, Clone, Copy)]
pub struct OperationDefinition {
    pub action: &'static str,
    pub path: &'static str,
}

/// Wire details of one AWS service
#[derive(Debug)]
pub struct ServiceDefinition {
    /// Name used in inventory configs (boto3 client name)
    pub name: &'static str,
    pub endpoint_prefix: &'static str,
    pub signing_name: &'static str,
    pub api_version: &'static str,
    pub protocol: Protocol,
    /// Global endpoint host, signed for us-east-1
    pub global_host: Option<&'static str>,
    pub operations: &'static [OperationDefinition],
}

const fn op(action: &'static str) -> OperationDefinition {
    OperationDefinition { action, path: "/" }
}

const fn rest(action: &'static str, path: &'static str) -> OperationDefinition {
    OperationDefinition { action, path }
}

const fn json(target_prefix: &'static str, json_version: &'static str) -> Protocol {
    Protocol::Json {
        target_prefix,
        json_version,
    }
}

pub static SERVICES: &[ServiceDefinition] = &[
    ServiceDefinition {
        name: "ec2",
        endpoint_prefix: "ec2",
        signing_name: "ec2",
        api_version: "2016-11-15",
        protocol: Protocol::Ec2,
        global_host: None,
        operations: &[
            op("DescribeInstances"),
            op("DescribeVpcs"),
            op("DescribeSubnets"),
            op("DescribeSecurityGroups"),
            op("DescribeVolumes"),
            op("DescribeSnapshots"),
            op("DescribeImages"),
            op("DescribeKeyPairs"),
            op("DescribeRegions"),
            op("DescribeAvailabilityZones"),
            op("DescribeAddresses"),
            op("DescribeNatGateways"),
            op("DescribeInternetGateways"),
            op("DescribeRouteTables"),
            op("DescribeNetworkInterfaces"),
            op("DescribeNetworkAcls"),
            op("DescribeVpcEndpoints"),
            op("DescribeVpcPeeringConnections"),
            op("DescribeTransitGateways"),
            op("DescribeLaunchTemplates"),
        ],
    },
    ServiceDefinition {
        name: "iam",
        endpoint_prefix: "iam",
        signing_name: "iam",
        api_version: "2010-05-08",
        protocol: Protocol::Query,
        global_host: Some("iam.amazonaws.com"),
        operations: &[
            op("ListUsers"),
            op("ListRoles"),
            op("ListGroups"),
            op("ListPolicies"),
            op("ListAccessKeys"),
            op("ListInstanceProfiles"),
            op("ListMFADevices"),
            op("ListServerCertificates"),
            op("ListAccountAliases"),
            op("ListSAMLProviders"),
            op("ListOpenIDConnectProviders"),
            op("GetAccountSummary"),
            op("GetAccountPasswordPolicy"),
        ],
    },
    ServiceDefinition {
        name: "sts",
        endpoint_prefix: "sts",
        signing_name: "sts",
        api_version: "2011-06-15",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[op("GetCallerIdentity")],
    },
    ServiceDefinition {
        name: "rds",
        endpoint_prefix: "rds",
        signing_name: "rds",
        api_version: "2014-10-31",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeDBInstances"),
            op("DescribeDBClusters"),
            op("DescribeDBSnapshots"),
            op("DescribeDBClusterSnapshots"),
            op("DescribeDBSubnetGroups"),
            op("DescribeDBParameterGroups"),
        ],
    },
    ServiceDefinition {
        name: "elbv2",
        endpoint_prefix: "elasticloadbalancing",
        signing_name: "elasticloadbalancing",
        api_version: "2015-12-01",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeLoadBalancers"),
            op("DescribeTargetGroups"),
            op("DescribeListeners"),
            op("DescribeSSLPolicies"),
        ],
    },
    ServiceDefinition {
        name: "elb",
        endpoint_prefix: "elasticloadbalancing",
        signing_name: "elasticloadbalancing",
        api_version: "2012-06-01",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[op("DescribeLoadBalancers")],
    },
    ServiceDefinition {
        name: "autoscaling",
        endpoint_prefix: "autoscaling",
        signing_name: "autoscaling",
        api_version: "2011-01-01",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeAutoScalingGroups"),
            op("DescribeAutoScalingInstances"),
            op("DescribeLaunchConfigurations"),
            op("DescribePolicies"),
            op("DescribeScheduledActions"),
        ],
    },
    ServiceDefinition {
        name: "cloudformation",
        endpoint_prefix: "cloudformation",
        signing_name: "cloudformation",
        api_version: "2010-05-15",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeStacks"),
            op("ListStacks"),
            op("ListExports"),
            op("ListStackSets"),
        ],
    },
    ServiceDefinition {
        name: "sns",
        endpoint_prefix: "sns",
        signing_name: "sns",
        api_version: "2010-03-31",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("ListTopics"),
            op("ListSubscriptions"),
            op("ListPlatformApplications"),
        ],
    },
    ServiceDefinition {
        name: "sqs",
        endpoint_prefix: "sqs",
        signing_name: "sqs",
        api_version: "2012-11-05",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[op("ListQueues")],
    },
    ServiceDefinition {
        name: "cloudwatch",
        endpoint_prefix: "monitoring",
        signing_name: "monitoring",
        api_version: "2010-08-01",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[op("DescribeAlarms"), op("ListMetrics"), op("ListDashboards")],
    },
    ServiceDefinition {
        name: "elasticache",
        endpoint_prefix: "elasticache",
        signing_name: "elasticache",
        api_version: "2015-02-02",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeCacheClusters"),
            op("DescribeReplicationGroups"),
            op("DescribeCacheSubnetGroups"),
            op("DescribeSnapshots"),
        ],
    },
    ServiceDefinition {
        name: "redshift",
        endpoint_prefix: "redshift",
        signing_name: "redshift",
        api_version: "2012-12-01",
        protocol: Protocol::Query,
        global_host: None,
        operations: &[
            op("DescribeClusters"),
            op("DescribeClusterSnapshots"),
            op("DescribeClusterSubnetGroups"),
        ],
    },
    ServiceDefinition {
        name: "dynamodb",
        endpoint_prefix: "dynamodb",
        signing_name: "dynamodb",
        api_version: "2012-08-10",
        protocol: json("DynamoDB_20120810", "1.0"),
        global_host: None,
        operations: &[
            op("ListTables"),
            op("DescribeTable"),
            op("ListBackups"),
            op("ListGlobalTables"),
            op("DescribeLimits"),
        ],
    },
    ServiceDefinition {
        name: "organizations",
        endpoint_prefix: "organizations",
        signing_name: "organizations",
        api_version: "2016-11-28",
        protocol: json("AWSOrganizationsV20161128", "1.1"),
        global_host: Some("organizations.us-east-1.amazonaws.com"),
        operations: &[
            op("ListAccounts"),
            op("DescribeOrganization"),
            op("ListRoots"),
            op("ListPolicies"),
            op("ListOrganizationalUnitsForParent"),
        ],
    },
    ServiceDefinition {
        name: "kms",
        endpoint_prefix: "kms",
        signing_name: "kms",
        api_version: "2014-11-01",
        protocol: json("TrentService", "1.1"),
        global_host: None,
        operations: &[op("ListKeys"), op("ListAliases"), op("DescribeKey")],
    },
    ServiceDefinition {
        name: "ecs",
        endpoint_prefix: "ecs",
        signing_name: "ecs",
        api_version: "2014-11-13",
        protocol: json("AmazonEC2ContainerServiceV20141113", "1.1"),
        global_host: None,
        operations: &[
            op("ListClusters"),
            op("DescribeClusters"),
            op("ListServices"),
            op("ListTaskDefinitions"),
            op("ListContainerInstances"),
        ],
    },
    ServiceDefinition {
        name: "ecr",
        endpoint_prefix: "api.ecr",
        signing_name: "ecr",
        api_version: "2015-09-21",
        protocol: json("AmazonEC2ContainerRegistry_V20150921", "1.1"),
        global_host: None,
        operations: &[op("DescribeRepositories"), op("DescribeImages")],
    },
    ServiceDefinition {
        name: "logs",
        endpoint_prefix: "logs",
        signing_name: "logs",
        api_version: "2014-03-28",
        protocol: json("Logs_20140328", "1.1"),
        global_host: None,
        operations: &[
            op("DescribeLogGroups"),
            op("DescribeMetricFilters"),
            op("DescribeSubscriptionFilters"),
            op("DescribeDestinations"),
        ],
    },
    ServiceDefinition {
        name: "secretsmanager",
        endpoint_prefix: "secretsmanager",
        signing_name: "secretsmanager",
        api_version: "2017-10-17",
        protocol: json("secretsmanager", "1.1"),
        global_host: None,
        // GetSecretValue stays out of the inventory surface
        operations: &[op("ListSecrets")],
    },
    ServiceDefinition {
        name: "ssm",
        endpoint_prefix: "ssm",
        signing_name: "ssm",
        api_version: "2014-11-06",
        protocol: json("AmazonSSM", "1.1"),
        global_host: None,
        operations: &[
            op("DescribeInstanceInformation"),
            op("DescribeParameters"),
            op("ListDocuments"),
            op("ListAssociations"),
        ],
    },
    ServiceDefinition {
        name: "cloudtrail",
        endpoint_prefix: "cloudtrail",
        signing_name: "cloudtrail",
        api_version: "2013-11-01",
        protocol: json("com.amazonaws.cloudtrail.v20131101.CloudTrail_20131101", "1.1"),
        global_host: None,
        operations: &[op("DescribeTrails"), op("ListTrails"), op("GetTrailStatus")],
    },
    ServiceDefinition {
        name: "acm",
        endpoint_prefix: "acm",
        signing_name: "acm",
        api_version: "2015-12-08",
        protocol: json("CertificateManager", "1.1"),
        global_host: None,
        operations: &[op("ListCertificates"), op("DescribeCertificate")],
    },
    ServiceDefinition {
        name: "lambda",
        endpoint_prefix: "lambda",
        signing_name: "lambda",
        api_version: "2015-03-31",
        protocol: Protocol::RestJson,
        global_host: None,
        operations: &[
            rest("ListFunctions", "/2015-03-31/functions/"),
            rest("ListLayers", "/2018-10-31/layers"),
            rest("ListEventSourceMappings", "/2015-03-31/event-source-mappings/"),
            rest("ListAliases", "/2015-03-31/functions/{FunctionName}/aliases"),
            rest("GetAccountSettings", "/2016-08-19/account-settings/"),
        ],
    },
    ServiceDefinition {
        name: "eks",
        endpoint_prefix: "eks",
        signing_name: "eks",
        api_version: "2017-11-01",
        protocol: Protocol::RestJson,
        global_host: None,
        operations: &[
            rest("ListClusters", "/clusters"),
            rest("DescribeCluster", "/clusters/{name}"),
            rest("ListNodegroups", "/clusters/{clusterName}/node-groups"),
            rest("ListFargateProfiles", "/clusters/{clusterName}/fargate-profiles"),
        ],
    },
    ServiceDefinition {
        name: "efs",
        endpoint_prefix: "elasticfilesystem",
        signing_name: "elasticfilesystem",
        api_version: "2015-02-01",
        protocol: Protocol::RestJson,
        global_host: None,
        operations: &[
            rest("DescribeFileSystems", "/2015-02-01/file-systems"),
            rest("DescribeMountTargets", "/2015-02-01/mount-targets"),
            rest("DescribeAccessPoints", "/2015-02-01/access-points"),
        ],
    },
    ServiceDefinition {
        name: "apigateway",
        endpoint_prefix: "apigateway",
        signing_name: "apigateway",
        api_version: "2015-07-09",
        protocol: Protocol::RestJson,
        global_host: None,
        operations: &[
            rest("GetRestApis", "/restapis"),
            rest("GetDomainNames", "/domainnames"),
            rest("GetUsagePlans", "/usageplans"),
        ],
    },
    ServiceDefinition {
        name: "route53",
        endpoint_prefix: "route53",
        signing_name: "route53",
        api_version: "2013-04-01",
        protocol: Protocol::RestXml,
        global_host: Some("route53.amazonaws.com"),
        operations: &[
            rest("ListHostedZones", "/2013-04-01/hostedzone"),
            rest("ListHealthChecks", "/2013-04-01/healthcheck"),
            rest("GetHostedZoneCount", "/2013-04-01/hostedzonecount"),
            rest("ListResourceRecordSets", "/2013-04-01/hostedzone/{Id}/rrset"),
        ],
    },
    ServiceDefinition {
        name: "cloudfront",
        endpoint_prefix: "cloudfront",
        signing_name: "cloudfront",
        api_version: "2020-05-31",
        protocol: Protocol::RestXml,
        global_host: Some("cloudfront.amazonaws.com"),
        operations: &[
            rest("ListDistributions", "/2020-05-31/distribution"),
            rest("ListCachePolicies", "/2020-05-31/cache-policy"),
            rest("ListOriginAccessControls", "/2020-05-31/origin-access-control"),
        ],
    },
    ServiceDefinition {
        name: "s3",
        endpoint_prefix: "s3",
        signing_name: "s3",
        api_version: "2006-03-01",
        protocol: Protocol::RestXml,
        global_host: Some("s3.amazonaws.com"),
        operations: &[rest("ListBuckets", "/")],
    },
];

/// Look up a service by its config name
pub fn service(name: &str) -> Option<&'static ServiceDefinition> {
    SERVICES.iter().find(|s| s.name == name)
}

/// Invoker for one catalog operation over the signed HTTP client
pub struct AwsOperation {
    client: AwsHttpClient,
    service: &'static ServiceDefinition,
    operation: OperationDefinition,
}

impl AwsOperation {
    pub fn new(
        client: AwsHttpClient,
        service: &'static ServiceDefinition,
        operation: OperationDefinition,
    ) -> Self {
        Self {
            client,
            service,
            operation,
        }
    }
}

#[async_trait]
impl Invoker for AwsOperation {
    async fn invoke(&self, request: InvokeRequest<'_>) -> Result<Value, CallError> {
        self.client
            .call(
                request.credentials,
                self.service,
                request.region,
                self.operation.action,
                self.operation.path,
                request.parameters,
            )
            .await
    }
}

/// Register every catalog operation with the registry
pub fn register(registry: &mut OperationRegistry, client: &AwsHttpClient) -> Result<(), ConfigError> {
    for service in SERVICES {
        for operation in service.operations {
            let invoker = AwsOperation::new(client.clone(), service, *operation);
            registry.register(service.name, &operation_name(operation.action), Arc::new(invoker))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::dispatcher::READ_ONLY_PREFIXES;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_is_read_only() {
        for service in SERVICES {
            for operation in service.operations {
                let name = operation_name(operation.action);
                assert!(
                    READ_ONLY_PREFIXES.iter().any(|p| name.starts_with(p)),
                    "{}.{} is not read-only",
                    service.name,
                    name
                );
            }
        }
    }

    #[test]
    fn test_service_names_unique() {
        let mut seen = HashSet::new();
        for service in SERVICES {
            assert!(seen.insert(service.name), "duplicate service {}", service.name);
        }
    }

    #[test]
    fn test_register_catalog() {
        let client = AwsHttpClient::new(std::time::Duration::from_secs(5)).unwrap();
        let mut registry = OperationRegistry::new();
        register(&mut registry, &client).unwrap();

        assert!(registry.contains("ec2", "describe_instances"));
        assert!(registry.contains("rds", "describe_db_instances"));
        assert!(registry.contains("iam", "list_mfa_devices"));
        assert!(registry.contains("organizations", "list_accounts"));
        assert!(registry.contains("s3", "list_buckets"));
        assert!(!registry.contains("ec2", "terminate_instances"));
    }
}
