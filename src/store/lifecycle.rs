//! Translates the declarative [`LifecycleRule`] list into an S3 bucket
//! lifecycle configuration, applied once at startup by the server and
//! reaper binaries (spec.md §4.12: "Declares the lifecycle policy to C1
//! at startup").

use aws_sdk_s3::types::{
    BucketLifecycleConfiguration, ExpirationStatus, LifecycleExpiration, LifecycleRuleFilter,
    StorageClass, Tag, Transition,
};
use aws_sdk_s3::Client as S3Client;

use super::object_store::LifecycleRule;

pub async fn apply(
    client: &S3Client,
    bucket: &str,
    rules: &[LifecycleRule],
) -> Result<(), aws_sdk_s3::Error> {
    let mut aws_rules = Vec::new();

    for rule in rules {
        let filter = if rule.tag_filter.0.is_empty() {
            LifecycleRuleFilter::Prefix(String::new())
        } else {
            LifecycleRuleFilter::Tag(
                Tag::builder()
                    .key(&rule.tag_filter.0)
                    .value(&rule.tag_filter.1)
                    .build()
                    .map_err(aws_sdk_s3::Error::from)?,
            )
        };

        let mut builder = aws_sdk_s3::types::LifecycleRule::builder()
            .id(&rule.id)
            .status(ExpirationStatus::Enabled)
            .filter(filter);

        if let Some(days) = rule.expire_after_days {
            builder = builder.expiration(LifecycleExpiration::builder().days(days as i32).build());
        }

        if let Some(days) = rule.transition_to_cold_after_days {
            builder = builder.transitions(
                Transition::builder()
                    .days(days as i32)
                    .storage_class(StorageClass::Glacier)
                    .build(),
            );
        }

        if let Some(days) = rule.abort_incomplete_multipart_after_days {
            builder = builder.abort_incomplete_multipart_upload(
                aws_sdk_s3::types::AbortIncompleteMultipartUpload::builder()
                    .days_after_initiation(days as i32)
                    .build(),
            );
        }

        aws_rules.push(builder.build().map_err(aws_sdk_s3::Error::from)?);
    }

    let config = BucketLifecycleConfiguration::builder()
        .set_rules(Some(aws_rules))
        .build()
        .map_err(aws_sdk_s3::Error::from)?;

    client
        .put_bucket_lifecycle_configuration()
        .bucket(bucket)
        .lifecycle_configuration(config)
        .send()
        .await
        .map_err(aws_sdk_s3::Error::from)?;

    Ok(())
}
