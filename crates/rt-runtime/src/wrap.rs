// SPDX-License-Identifier: MIT OR Apache-2.0
//! Source wrapping: splices the host bridge around user code before it is
//! written to the sandbox's temp file (spec §4.6 step 4).

use rt_core::{ExecutionRequest, RuntimeType};
use rt_tokens::IssuedTokens;

/// The embedded SDK shim made available to user code as `fluxbase`.
///
/// Deliberately minimal: a request accessor, a cancellation probe backed
/// by the `FLUXBASE_*_CANCELLED` env var, and a progress emitter that
/// prints the `__PROGRESS__::` sentinel frame.
const EMBEDDED_SDK: &str = r#"
const __fluxbaseEnv = (name) => Deno.env.get(name) ?? "";
const __fluxbaseCancelVar = () => __fluxbaseEnv("FLUXBASE_FUNCTION_CANCELLED") === "true"
  || __fluxbaseEnv("FLUXBASE_JOB_CANCELLED") === "true";

function __fluxbaseMakeClient(token) {
  return {
    token,
    baseUrl: __fluxbaseEnv("FLUXBASE_URL"),
  };
}

function __fluxbaseMakeUtilities(context) {
  return {
    progress(percent, message, data) {
      const frame = { percent, message: message ?? null, data: data ?? {} };
      console.log("__PROGRESS__::" + JSON.stringify(frame));
    },
    isCancelled() {
      return __fluxbaseCancelVar();
    },
    context() {
      return context;
    },
    payload() {
      return context.payload ?? null;
    },
  };
}
"#;

/// Wrap `(imports, remainder)` with the embedded SDK, client initializers,
/// a utilities object, and an async invocation trampoline.
///
/// The trampoline looks up an exported handler named `handler`, `default`,
/// or `main`; for functions it normalizes the return value into
/// `{status, headers, body}`, for jobs it treats the return value as the
/// job result. Both print the `__RESULT__::` sentinel frame, and catch
/// exceptions into the failure shape appropriate to the runtime type.
#[must_use]
pub fn wrap(
    imports: &str,
    remainder: &str,
    request: &ExecutionRequest,
    runtime_type: RuntimeType,
    tokens: &IssuedTokens,
) -> String {
    let request_json = serde_json::to_string(request).unwrap_or_else(|_| "null".to_string());
    let user_token = tokens.user_token.clone().unwrap_or_default();
    let service_token = tokens.service_token.clone().unwrap_or_default();

    let trampoline = match runtime_type {
        RuntimeType::Function => FUNCTION_TRAMPOLINE,
        RuntimeType::Job => JOB_TRAMPOLINE,
    };

    format!(
        "{imports}\n{sdk}\n\
         const __fluxbaseRequest = {request_json};\n\
         const __fluxbaseUserClient = __fluxbaseMakeClient({user_token:?});\n\
         const __fluxbaseServiceClient = __fluxbaseMakeClient({service_token:?});\n\
         const __fluxbaseUtilities = __fluxbaseMakeUtilities(__fluxbaseRequest);\n\
         {remainder}\n\
         {trampoline}\n",
        imports = imports,
        sdk = EMBEDDED_SDK,
        remainder = remainder,
        trampoline = trampoline,
    )
}

const FUNCTION_TRAMPOLINE: &str = r#"
(async () => {
  const __fn = (typeof handler !== "undefined" && handler)
    || (typeof main !== "undefined" && main)
    || (typeof __default !== "undefined" && __default);
  try {
    if (!__fn) throw new Error("no exported handler, default, or main function found");
    const raw = await __fn(__fluxbaseRequest, __fluxbaseUserClient, __fluxbaseServiceClient, __fluxbaseUtilities);
    let envelope;
    if (raw && typeof raw === "object" && ("status" in raw || "body" in raw)) {
      envelope = {
        status: raw.status ?? 200,
        headers: raw.headers ?? {},
        body: typeof raw.body === "string" ? raw.body : JSON.stringify(raw.body ?? null),
      };
    } else {
      envelope = { status: 200, headers: {}, body: JSON.stringify(raw ?? null) };
    }
    console.log("__RESULT__::" + JSON.stringify(envelope));
  } catch (err) {
    const envelope = {
      status: 500,
      headers: {},
      body: JSON.stringify({ error: String(err && err.message || err), stack: err && err.stack || null }),
    };
    console.log("__RESULT__::" + JSON.stringify(envelope));
  }
})();
"#;

const JOB_TRAMPOLINE: &str = r#"
(async () => {
  const __fn = (typeof handler !== "undefined" && handler)
    || (typeof main !== "undefined" && main)
    || (typeof __default !== "undefined" && __default);
  try {
    if (!__fn) throw new Error("no exported handler, default, or main function found");
    const result = await __fn(__fluxbaseRequest, __fluxbaseUserClient, __fluxbaseServiceClient, __fluxbaseUtilities);
    console.log("__RESULT__::" + JSON.stringify({ success: true, result: result ?? null }));
  } catch (err) {
    console.log("__RESULT__::" + JSON.stringify({
      success: false,
      error: String(err && err.message || err),
      stack: err && err.stack || null,
    }));
  }
})();
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rt_core::RequestShape;
    use std::collections::BTreeMap;

    fn sample_request() -> ExecutionRequest {
        ExecutionRequest {
            id: uuid::Uuid::nil(),
            name: "f".into(),
            namespace: "ns".into(),
            actor_id: None,
            actor_email: None,
            actor_role: None,
            origin_url: None,
            base_url: None,
            shape: RequestShape::Http {
                method: "GET".into(),
                url: "/".into(),
                headers: BTreeMap::new(),
                body: None,
                params: BTreeMap::new(),
                session_id: None,
            },
        }
    }

    #[test]
    fn function_wrap_includes_function_trampoline() {
        let req = sample_request();
        let tokens = IssuedTokens::default();
        let wrapped = wrap("", "export const handler = () => {}", &req, RuntimeType::Function, &tokens);
        assert!(wrapped.contains("__RESULT__::"));
        assert!(wrapped.contains("envelope"));
        assert!(wrapped.contains("export const handler"));
    }

    #[test]
    fn job_wrap_includes_job_trampoline() {
        let req = sample_request();
        let tokens = IssuedTokens::default();
        let wrapped = wrap("", "export const handler = () => {}", &req, RuntimeType::Job, &tokens);
        assert!(wrapped.contains("success: true"));
    }

    #[test]
    fn imports_precede_remainder_in_output() {
        let req = sample_request();
        let tokens = IssuedTokens::default();
        let wrapped = wrap("import x from 'y';", "const z = 1;", &req, RuntimeType::Function, &tokens);
        let imports_pos = wrapped.find("import x from 'y';").unwrap();
        let remainder_pos = wrapped.find("const z = 1;").unwrap();
        assert!(imports_pos < remainder_pos);
    }
}
