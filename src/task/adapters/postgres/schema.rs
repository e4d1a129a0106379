//! Diesel schema for task persistence.

diesel::table! {
    /// Task records.
    tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Handler and callback selector.
        #[max_length = 255]
        task_type -> Varchar,
        /// Optional handler variant.
        #[max_length = 255]
        script_name -> Nullable<Varchar>,
        /// Target object identifier.
        #[max_length = 255]
        target_id -> Varchar,
        /// Target object type.
        #[max_length = 255]
        target_type -> Varchar,
        /// `manual` or `system`.
        #[max_length = 20]
        runner_type -> Varchar,
        /// Earliest dispatch time.
        start_time -> Timestamptz,
        /// Completion timestamp.
        completed_at -> Nullable<Timestamptz>,
        /// Handler input payload.
        input -> Jsonb,
        /// Final result payload.
        output -> Nullable<Jsonb>,
        /// Failure report.
        error -> Nullable<Jsonb>,
        /// Lifecycle status.
        #[max_length = 20]
        status -> Varchar,
        /// Continuation context.
        context -> Jsonb,
        /// Poll history of the current attempt.
        poll_results -> Jsonb,
        /// Poll attempts in the current attempt.
        poll_count -> Int4,
        /// Advisory progress percentage.
        progress -> Int2,
        /// Free-text message.
        msg -> Nullable<Text>,
        /// Handler options.
        options -> Jsonb,
        /// Creator.
        #[max_length = 255]
        user_id -> Nullable<Varchar>,
        /// Operator who resolved the task.
        #[max_length = 255]
        completed_user_id -> Nullable<Varchar>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
    }
}
